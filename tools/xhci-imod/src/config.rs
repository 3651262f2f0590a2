//! `imod-config.ini` parsing and per-controller settings resolution.
//!
//! ```ini
//! [global]
//! INTERVAL = 0x0
//!
//! [device:VEN_8086&DEV_A36D]
//! INTERVAL = 0xFA0
//! ENABLED = true
//! ```
//!
//! Keys before any section header, or after `[global]`, set the global defaults. Each
//! `[device:<pattern>]` section (also spelled `[device <pattern>]`) adds an override rule matched
//! by case-insensitive substring against the controller's device instance ID.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::text;

pub const DEFAULT_INTERVAL: u32 = 0x0;
pub const DEFAULT_HCSPARAMS_OFFSET: u32 = crate::regs::cap::HCSPARAMS1;
pub const DEFAULT_RTSOFF: u32 = crate::regs::cap::RTSOFF;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open config: {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid number at line {line}")]
    InvalidNumber { line: usize },

    #[error("invalid enabled value at line {line}")]
    InvalidEnabled { line: usize },
}

/// One `[device:<pattern>]` section. Unset fields leave earlier values untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideRule {
    pub pattern: String,
    pub interval: Option<u32>,
    pub hcsparams_offset: Option<u32>,
    pub rtsoff: Option<u32>,
    pub enabled: Option<bool>,
}

impl OverrideRule {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }

    pub fn matches(&self, device_id: &str) -> bool {
        text::contains_ignore_case(device_id, &self.pattern)
    }
}

/// Global defaults plus the override rules, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImodConfig {
    pub interval: u32,
    pub hcsparams_offset: u32,
    pub rtsoff: u32,
    pub overrides: Vec<OverrideRule>,
}

impl Default for ImodConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            hcsparams_offset: DEFAULT_HCSPARAMS_OFFSET,
            rtsoff: DEFAULT_RTSOFF,
            overrides: Vec::new(),
        }
    }
}

/// Effective settings for one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub interval: u32,
    pub hcsparams_offset: u32,
    pub rtsoff: u32,
    pub enabled: bool,
    /// Pattern of the last override rule that matched, if any.
    pub matched_override: Option<String>,
}

/// Where the active `key = value` lines go.
enum Target {
    Global,
    Device(usize),
}

impl ImodConfig {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&String::from_utf8_lossy(&bytes))?;
        tracing::debug!(
            path = %path.display(),
            overrides = config.overrides.len(),
            "loaded IMOD config"
        );
        Ok(config)
    }

    /// Load `path` when present, otherwise fall back to the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut target = Target::Global;

        for (index, raw) in input.lines().enumerate() {
            let line_number = index + 1;
            let raw = if line_number == 1 {
                raw.strip_prefix('\u{feff}').unwrap_or(raw)
            } else {
                raw
            };

            let line = text::trim(text::strip_inline_comment(raw));
            if line.is_empty() {
                continue;
            }

            if let Some(section) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let section = text::trim(section);
                if text::eq_ignore_case(section, "global") {
                    target = Target::Global;
                    continue;
                }

                let pattern = text::strip_prefix_ignore_case(section, "device:")
                    .or_else(|| text::strip_prefix_ignore_case(section, "device "))
                    .map(text::trim);
                match pattern {
                    Some(pattern) if !pattern.is_empty() => {
                        config.overrides.push(OverrideRule::new(pattern));
                        target = Target::Device(config.overrides.len() - 1);
                    }
                    _ => {
                        tracing::warn!(
                            line = line_number,
                            section = %section,
                            "ignoring config section"
                        );
                    }
                }
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = text::fold_case(text::trim(key));
            let value = text::trim(value);

            let field = match key.as_str() {
                "ENABLED" => {
                    let enabled = text::parse_bool(value)
                        .ok_or(ConfigError::InvalidEnabled { line: line_number })?;
                    match target {
                        Target::Device(rule) => config.overrides[rule].enabled = Some(enabled),
                        Target::Global => {
                            tracing::warn!(
                                line = line_number,
                                "ENABLED has no effect in the global section"
                            );
                        }
                    }
                    continue;
                }
                "INTERVAL" => Some(Field::Interval),
                "HCSPARAMS_OFFSET" | "HCSPARAPS_OFFSET" => Some(Field::HcsparamsOffset),
                "RTSOFF" => Some(Field::Rtsoff),
                _ => None,
            };

            // Every key other than ENABLED carries a number, known or not.
            let parsed =
                text::parse_u32(value).ok_or(ConfigError::InvalidNumber { line: line_number })?;
            let Some(field) = field else {
                tracing::debug!(line = line_number, key = %key, "ignoring unknown config key");
                continue;
            };
            match target {
                Target::Global => field.set_global(&mut config, parsed),
                Target::Device(rule) => field.set_override(&mut config.overrides[rule], parsed),
            }
        }

        Ok(config)
    }

    /// Effective settings for the controller with instance ID `device_id`.
    ///
    /// Rules apply in file order; each one only overwrites the fields it sets, so a later match
    /// that leaves a field unset keeps whatever an earlier match chose.
    pub fn resolve(&self, device_id: &str) -> ResolvedSettings {
        let mut settings = ResolvedSettings {
            interval: self.interval,
            hcsparams_offset: self.hcsparams_offset,
            rtsoff: self.rtsoff,
            enabled: true,
            matched_override: None,
        };

        for rule in self.overrides.iter().filter(|rule| rule.matches(device_id)) {
            if let Some(enabled) = rule.enabled {
                settings.enabled = enabled;
            }
            if let Some(interval) = rule.interval {
                settings.interval = interval;
            }
            if let Some(offset) = rule.hcsparams_offset {
                settings.hcsparams_offset = offset;
            }
            if let Some(rtsoff) = rule.rtsoff {
                settings.rtsoff = rtsoff;
            }
            settings.matched_override = Some(rule.pattern.clone());
        }

        settings
    }
}

#[derive(Clone, Copy)]
enum Field {
    Interval,
    HcsparamsOffset,
    Rtsoff,
}

impl Field {
    fn set_global(self, config: &mut ImodConfig, value: u32) {
        match self {
            Field::Interval => config.interval = value,
            Field::HcsparamsOffset => config.hcsparams_offset = value,
            Field::Rtsoff => config.rtsoff = value,
        }
    }

    fn set_override(self, rule: &mut OverrideRule, value: u32) {
        match self {
            Field::Interval => rule.interval = Some(value),
            Field::HcsparamsOffset => rule.hcsparams_offset = Some(value),
            Field::Rtsoff => rule.rtsoff = Some(value),
        }
    }
}
