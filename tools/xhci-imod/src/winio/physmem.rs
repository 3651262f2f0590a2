//! Scoped physical memory access: map, one 32-bit access, unmap.
//!
//! Nothing is cached between calls. Every access maps exactly the four bytes it touches and
//! releases them before returning, so no mapping outlives a single register access.

use std::ptr;

use super::protocol::{DriverChannel, PhysStruct};
use super::AccessError;

const DWORD: u64 = 4;

/// 32-bit register access by physical address.
pub trait RegisterAccess {
    fn read_dword(&mut self, address: u64) -> Result<u32, AccessError>;

    fn write_dword(&mut self, address: u64, value: u32) -> Result<(), AccessError>;
}

/// Read the 32-bit value at physical `address`.
///
/// If the unmap fails the value is discarded and the unmap error is returned.
pub fn read_dword<C>(channel: &mut C, address: u64) -> Result<u32, AccessError>
where
    C: DriverChannel + ?Sized,
{
    let mapping = map_dword(channel, address)?;
    // SAFETY: `map_dword` only returns mappings with a nonzero linear address, which the
    // `DriverChannel` contract guarantees is valid for 4 bytes until unmapped below.
    let value = unsafe { ptr::read_volatile(linear_ptr(&mapping)) };
    unmap(channel, &mapping)?;
    Ok(value)
}

/// Write `value` to the 32-bit register at physical `address`.
pub fn write_dword<C>(channel: &mut C, address: u64, value: u32) -> Result<(), AccessError>
where
    C: DriverChannel + ?Sized,
{
    let mapping = map_dword(channel, address)?;
    // SAFETY: as in `read_dword`.
    unsafe { ptr::write_volatile(linear_ptr(&mapping), value) };
    unmap(channel, &mapping)
}

fn map_dword<C>(channel: &mut C, address: u64) -> Result<PhysStruct, AccessError>
where
    C: DriverChannel + ?Sized,
{
    if address % DWORD != 0 {
        return Err(AccessError::Unaligned(address));
    }

    let mapping = channel
        .map_physical(PhysStruct::request(address, DWORD))
        .map_err(AccessError::Map)?;
    if mapping.linear_address == 0 {
        return Err(AccessError::NullMapping);
    }
    tracing::trace!(
        phys = format_args!("{address:#x}"),
        linear = format_args!("{:#x}", mapping.linear_address),
        "mapped"
    );
    Ok(mapping)
}

fn unmap<C>(channel: &mut C, mapping: &PhysStruct) -> Result<(), AccessError>
where
    C: DriverChannel + ?Sized,
{
    channel.unmap_physical(mapping).map_err(AccessError::Unmap)
}

fn linear_ptr(mapping: &PhysStruct) -> *mut u32 {
    mapping.linear_address as usize as *mut u32
}
