//! WinIo driver request codes and wire layout.

use crate::error::PlatformError;

pub const FILE_DEVICE_WINIO: u32 = 0x0000_8010;
pub const WINIO_IOCTL_INDEX: u32 = 0x810;

const METHOD_BUFFERED: u32 = 0;
const FILE_ANY_ACCESS: u32 = 0;

/// `CTL_CODE` from `winioctl.h`.
pub const fn ctl_code(device_type: u32, function: u32, method: u32, access: u32) -> u32 {
    (device_type << 16) | (access << 14) | (function << 2) | method
}

pub const IOCTL_WINIO_MAPPHYSTOLIN: u32 =
    ctl_code(FILE_DEVICE_WINIO, WINIO_IOCTL_INDEX, METHOD_BUFFERED, FILE_ANY_ACCESS);
pub const IOCTL_WINIO_UNMAPPHYSADDR: u32 =
    ctl_code(FILE_DEVICE_WINIO, WINIO_IOCTL_INDEX + 1, METHOD_BUFFERED, FILE_ANY_ACCESS);
pub const IOCTL_WINIO_ENABLEDIRECTIO: u32 =
    ctl_code(FILE_DEVICE_WINIO, WINIO_IOCTL_INDEX + 2, METHOD_BUFFERED, FILE_ANY_ACCESS);
pub const IOCTL_WINIO_DISABLEDIRECTIO: u32 =
    ctl_code(FILE_DEVICE_WINIO, WINIO_IOCTL_INDEX + 3, METHOD_BUFFERED, FILE_ANY_ACCESS);

/// In/out buffer of the map and unmap requests.
///
/// Five 64-bit fields in fixed order; there is no padding, so the in-memory layout is the wire
/// layout. The driver fills in the handle, linear address and section on map, and expects the
/// same struct back on unmap.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhysStruct {
    pub size: u64,
    pub phys_address: u64,
    pub phys_memory_handle: u64,
    pub linear_address: u64,
    pub phys_section: u64,
}

const _: () = assert!(std::mem::size_of::<PhysStruct>() == 40);

impl PhysStruct {
    /// A map request for `size` bytes at `phys_address`.
    pub fn request(phys_address: u64, size: u64) -> Self {
        Self {
            size,
            phys_address,
            ..Self::default()
        }
    }
}

/// An open channel to the WinIo driver.
///
/// # Safety
///
/// When `map_physical` succeeds with a nonzero `linear_address`, that address must be valid for
/// volatile reads and writes of `size` bytes in this process until the returned struct is passed
/// to `unmap_physical`.
pub unsafe trait DriverChannel {
    fn enable_direct_io(&mut self) -> Result<(), PlatformError>;

    fn disable_direct_io(&mut self) -> Result<(), PlatformError>;

    fn map_physical(&mut self, request: PhysStruct) -> Result<PhysStruct, PlatformError>;

    fn unmap_physical(&mut self, mapping: &PhysStruct) -> Result<(), PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn ioctl_codes_match_the_driver() {
        assert_eq!(IOCTL_WINIO_MAPPHYSTOLIN, 0x8010_2040);
        assert_eq!(IOCTL_WINIO_UNMAPPHYSADDR, 0x8010_2044);
        assert_eq!(IOCTL_WINIO_ENABLEDIRECTIO, 0x8010_2048);
        assert_eq!(IOCTL_WINIO_DISABLEDIRECTIO, 0x8010_204C);
    }

    #[test]
    fn phys_struct_fields_are_in_wire_order() {
        assert_eq!(offset_of!(PhysStruct, size), 0);
        assert_eq!(offset_of!(PhysStruct, phys_address), 8);
        assert_eq!(offset_of!(PhysStruct, phys_memory_handle), 16);
        assert_eq!(offset_of!(PhysStruct, linear_address), 24);
        assert_eq!(offset_of!(PhysStruct, phys_section), 32);
    }
}
