//! WinIo kernel driver: service lifecycle and physical register access.

pub mod physmem;
pub mod protocol;
pub mod session;
#[cfg(windows)]
pub mod windows;

use thiserror::Error;

use crate::error::PlatformError;

pub use physmem::RegisterAccess;
pub use protocol::{DriverChannel, PhysStruct};
pub use session::{
    PrivilegedSession, ServiceControl, ServiceState, SessionOptions, StartOutcome, StopOutcome,
    StopWait, TeardownReport,
};

pub const DEVICE_PATH: &str = r"\\.\WINIO";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open service control manager: {0}")]
    ServiceManager(PlatformError),

    #[error("failed to open service {name}: {error}")]
    OpenService {
        name: String,
        error: PlatformError,
    },

    #[error("failed to create service {name}: {error}")]
    CreateService {
        name: String,
        error: PlatformError,
    },

    #[error("failed to start service {name}: {error}")]
    StartService {
        name: String,
        error: PlatformError,
    },

    #[error("failed to open \\\\.\\WINIO: {0}")]
    OpenChannel(PlatformError),

    #[error("failed to enable direct I/O: {0}")]
    EnableDirectIo(PlatformError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("failed to map physical memory: {0}")]
    Map(PlatformError),

    #[error("failed to map physical memory: driver returned a null linear address")]
    NullMapping,

    #[error("failed to unmap physical memory: {0}")]
    Unmap(PlatformError),

    #[error("physical address {0:#x} is not 4-byte aligned")]
    Unaligned(u64),

    #[error("register address overflows the physical address space")]
    AddressOverflow,
}
