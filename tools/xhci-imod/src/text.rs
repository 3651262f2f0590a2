//! Small text helpers shared by device discovery and the config parser.
//!
//! Case folding is locale-insensitive: it uses Unicode simple uppercase mapping, never the
//! process locale. Device instance IDs and config keys are effectively ASCII anyway.

/// Uppercase `value` without consulting the current locale.
pub fn fold_case(value: &str) -> String {
    value.chars().flat_map(char::to_uppercase).collect()
}

/// Trim spaces, tabs, carriage returns and line feeds from both ends.
///
/// Narrower than [`str::trim`] on purpose: other Unicode whitespace is kept as content.
pub fn trim(value: &str) -> &str {
    value.trim_matches(|ch| matches!(ch, ' ' | '\t' | '\r' | '\n'))
}

pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    fold_case(haystack).contains(&fold_case(needle))
}

pub fn eq_ignore_case(left: &str, right: &str) -> bool {
    fold_case(left) == fold_case(right)
}

/// Returns the remainder of `value` after `prefix` when `value` starts with it (ignoring case).
pub fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    eq_ignore_case(head, prefix).then(|| &value[prefix.len()..])
}

/// Cut everything from the first `#` or `;` onward.
pub fn strip_inline_comment(value: &str) -> &str {
    match value.find(['#', ';']) {
        Some(cut) => &value[..cut],
        None => value,
    }
}

/// Parse an unsigned 32-bit literal in decimal, `0x`-prefixed hex, or `0`-prefixed octal.
///
/// A single leading `+` is allowed. The whole (trimmed) input must be consumed and the value
/// must fit in `u32`.
pub fn parse_u32(text: &str) -> Option<u32> {
    let text = trim(text);
    let text = text.strip_prefix('+').unwrap_or(text);
    if text.is_empty() {
        return None;
    }

    let (digits, radix) = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };

    // A second sign, or one after the radix prefix, must not reach `from_str_radix`.
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_digit(radix)) {
        return None;
    }
    u32::from_str_radix(digits, radix).ok()
}

/// Parse `TRUE`/`FALSE`/`1`/`0` (any case), or any numeric literal by its truthiness.
pub fn parse_bool(text: &str) -> Option<bool> {
    let folded = fold_case(trim(text));
    match folded.as_str() {
        "TRUE" | "1" => Some(true),
        "FALSE" | "0" => Some(false),
        other => parse_u32(other).map(|value| value != 0),
    }
}
