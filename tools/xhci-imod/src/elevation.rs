//! Process privilege and addressing-mode checks.

/// Whether the process token is a member of the local Administrators group.
#[cfg(windows)]
pub fn is_elevated() -> bool {
    use windows::core::BOOL;
    use windows::Win32::Security::{
        AllocateAndInitializeSid, CheckTokenMembership, FreeSid, PSID, SECURITY_NT_AUTHORITY,
    };
    use windows::Win32::System::SystemServices::{
        DOMAIN_ALIAS_RID_ADMINS, SECURITY_BUILTIN_DOMAIN_RID,
    };

    let mut admins = PSID::default();
    let allocated = unsafe {
        AllocateAndInitializeSid(
            &SECURITY_NT_AUTHORITY,
            2,
            SECURITY_BUILTIN_DOMAIN_RID,
            DOMAIN_ALIAS_RID_ADMINS,
            0,
            0,
            0,
            0,
            0,
            0,
            &mut admins,
        )
    };
    if allocated.is_err() {
        return false;
    }

    let mut member = BOOL(0);
    let checked = unsafe { CheckTokenMembership(None, admins, &mut member) };
    unsafe {
        let _ = FreeSid(admins);
    }
    checked.is_ok() && member.as_bool()
}

#[cfg(not(windows))]
pub fn is_elevated() -> bool {
    false
}

/// True on a 32-bit Windows kernel, where the driver needs direct I/O enabled.
#[cfg(windows)]
pub fn legacy_addressing() -> bool {
    if cfg!(target_pointer_width = "64") {
        return false;
    }

    use windows::core::BOOL;
    use windows::Win32::System::Threading::{GetCurrentProcess, IsWow64Process};

    // A 32-bit process under WOW64 still talks to a 64-bit kernel.
    let mut wow64 = BOOL(0);
    match unsafe { IsWow64Process(GetCurrentProcess(), &mut wow64) } {
        Ok(()) => !wow64.as_bool(),
        Err(_) => true,
    }
}

#[cfg(not(windows))]
pub fn legacy_addressing() -> bool {
    false
}
