//! Interrupt moderation (IMOD) tuning for xHCI USB host controllers on Windows.
//!
//! The tool discovers every xHCI controller through SetupAPI/CfgMgr32, resolves the physical
//! base of its register space, and writes a moderation interval into the `IMOD` register of each
//! interrupter. Physical memory is reached through the WinIo kernel driver, which is installed as
//! a demand-start service for the duration of a run.
//!
//! Everything that touches the operating system sits behind a trait ([`discovery::DeviceTree`],
//! [`winio::ServiceControl`], [`winio::DriverChannel`]) so the algorithms can be exercised on any
//! host. The Windows implementations live in `#[cfg(windows)]` submodules.

pub mod config;
pub mod discovery;
pub mod elevation;
pub mod error;
pub mod locate;
pub mod regs;
pub mod report;
pub mod text;
pub mod tuning;
pub mod winio;

pub use config::{ConfigError, ImodConfig, OverrideRule, ResolvedSettings};
pub use discovery::{discover, BaseAddressError, ControllerRecord, DiscoveryError};
pub use error::PlatformError;
pub use tuning::{tune, ImodStats, Outcome, TuningReport};
pub use winio::{AccessError, PrivilegedSession, RegisterAccess, SessionError, SessionOptions};

/// Service name the WinIo driver is registered under.
pub const WINIO_SERVICE_NAME: &str = "WINIO";
/// File name of the WinIo driver image.
pub const DRIVER_FILE_NAME: &str = "winio.sys";
/// File name of the optional configuration file.
pub const CONFIG_FILE_NAME: &str = "imod-config.ini";
