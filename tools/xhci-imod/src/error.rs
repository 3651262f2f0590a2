use thiserror::Error;

/// A failed operating-system call, identified by its raw status code.
///
/// Win32 codes render through [`std::io::Error`] so the message is the system's own
/// `FormatMessage` text on Windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("{}", win32_message(*.0))]
    Win32(u32),

    /// CfgMgr32 status (`CONFIGRET`).
    #[error("CONFIGRET {0}")]
    ConfigRet(u32),
}

impl PlatformError {
    pub fn code(&self) -> u32 {
        match *self {
            PlatformError::Win32(code) | PlatformError::ConfigRet(code) => code,
        }
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for PlatformError {
    fn from(err: windows::core::Error) -> Self {
        // HRESULT_FROM_WIN32 keeps the Win32 code in the low word.
        PlatformError::Win32((err.code().0 as u32) & 0xffff)
    }
}

fn win32_message(code: u32) -> String {
    // Win32 error codes are DWORDs; the io::Error constructor takes them as i32 bit patterns.
    std::io::Error::from_raw_os_error(code as i32).to_string()
}
