//! xHCI controller discovery.
//!
//! Discovery walks every present PCI device, keeps the ones that look like xHCI controllers, and
//! records their instance ID, display name, problem code and the physical base of their register
//! space. The OS side is reached through [`DeviceTree`]; `windows::SetupDiDeviceTree` is the
//! SetupAPI/CfgMgr32 implementation.

#[cfg(windows)]
pub mod windows;

use thiserror::Error;

use crate::error::PlatformError;
use crate::text;

/// Device Manager problem code for a device disabled by the user (`CM_PROB_DISABLED`).
pub const CM_PROB_DISABLED: u32 = 0x0000_0016;

/// Service name of the inbox xHCI driver.
pub const XHCI_SERVICE_NAME: &str = "USBXHCI";

/// PCI class code 0C/03/30 (serial bus, USB, xHCI) as it appears in hardware/compatible IDs.
pub const XHCI_CLASS_SIGNATURES: [&str; 2] = ["CC_0C0330", "CLASS_0C0330"];

/// Caption used when a device has neither a friendly name nor a description.
pub const UNKNOWN_CAPTION: &str = "Unknown USB Controller";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to enumerate PCI devices: {0}")]
    OpenDeviceList(PlatformError),

    #[error("failed to enumerate device info at index {index}: {error}")]
    Enumerate { index: u32, error: PlatformError },
}

/// Why a controller's register base could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BaseAddressError {
    #[error("failed to query logical config (CONFIGRET {code})")]
    LogicalConfig { code: u32 },

    #[error("no memory resource found")]
    NoMemoryResource,
}

/// One discovered xHCI controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRecord {
    /// Device instance ID, e.g. `PCI\VEN_8086&DEV_A36D&...`.
    pub device_id: String,
    pub caption: String,
    /// `0` for a healthy device.
    pub problem_code: u32,
    /// Physical base of the register space. `Ok(0)` is a (suspicious) resolved address, not a
    /// failure.
    pub base: Result<u64, BaseAddressError>,
}

impl ControllerRecord {
    pub fn is_disabled(&self) -> bool {
        self.problem_code == CM_PROB_DISABLED
    }
}

/// Registry-backed device properties consulted during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProperty {
    Service,
    HardwareIds,
    CompatibleIds,
    FriendlyName,
    DeviceDescription,
}

/// Which CfgMgr32 memory resource descriptor a buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryResourceKind {
    /// `ResType_Mem` (`MEM_RESOURCE`).
    Mem,
    /// `ResType_MemLarge` (`MEM_LARGE_RESOURCE`).
    MemLarge,
}

/// Raw resource descriptor data as returned by `CM_Get_Res_Des_Data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryResource {
    pub kind: MemoryResourceKind,
    pub data: Vec<u8>,
}

/// Read-only view of the system device tree.
pub trait DeviceTree {
    type Device;

    /// Device at `index`, or `None` once enumeration is exhausted.
    fn device(&mut self, index: u32) -> Result<Option<Self::Device>, PlatformError>;

    /// String values of `property`; empty when the property is missing or not a string type.
    fn property(&mut self, device: &Self::Device, property: DeviceProperty) -> Vec<String>;

    fn instance_id(&mut self, device: &Self::Device) -> Option<String>;

    /// Problem code from `CM_Get_DevNode_Status`, or `None` when the query fails.
    fn problem_code(&mut self, device: &Self::Device) -> Option<u32>;

    /// Memory descriptors of the device's active (falling back to boot) logical configuration,
    /// `ResType_Mem` first.
    fn memory_resources(
        &mut self,
        device: &Self::Device,
    ) -> Result<Vec<MemoryResource>, BaseAddressError>;
}

/// Enumerate xHCI controllers.
///
/// Only enumeration failures are fatal. A controller whose status, caption or register base
/// cannot be read is still returned.
pub fn discover<T: DeviceTree>(tree: &mut T) -> Result<Vec<ControllerRecord>, DiscoveryError> {
    let mut controllers = Vec::new();

    for index in 0u32.. {
        let device = match tree.device(index) {
            Ok(Some(device)) => device,
            Ok(None) => break,
            Err(error) => return Err(DiscoveryError::Enumerate { index, error }),
        };

        if !is_xhci_device(tree, &device) {
            continue;
        }

        let Some(device_id) = tree.instance_id(&device) else {
            tracing::debug!(index, "skipping xHCI device without an instance ID");
            continue;
        };

        let caption = device_caption(tree, &device);
        let problem_code = tree.problem_code(&device).unwrap_or(0);
        let base = tree
            .memory_resources(&device)
            .and_then(|resources| lowest_memory_base(&resources, DescriptorPacking::NATIVE));

        tracing::debug!(%device_id, problem_code, ?base, "found xHCI controller");
        controllers.push(ControllerRecord {
            device_id,
            caption,
            problem_code,
            base,
        });
    }

    Ok(controllers)
}

fn is_xhci_device<T: DeviceTree>(tree: &mut T, device: &T::Device) -> bool {
    let service = tree.property(device, DeviceProperty::Service);
    if service
        .first()
        .is_some_and(|service| text::eq_ignore_case(service, XHCI_SERVICE_NAME))
    {
        return true;
    }

    has_xhci_class_code(&tree.property(device, DeviceProperty::HardwareIds))
        || has_xhci_class_code(&tree.property(device, DeviceProperty::CompatibleIds))
}

pub fn has_xhci_class_code(ids: &[String]) -> bool {
    ids.iter().any(|id| {
        XHCI_CLASS_SIGNATURES
            .iter()
            .any(|signature| text::contains_ignore_case(id, signature))
    })
}

fn device_caption<T: DeviceTree>(tree: &mut T, device: &T::Device) -> String {
    [DeviceProperty::FriendlyName, DeviceProperty::DeviceDescription]
        .into_iter()
        .find_map(|property| tree.property(device, property).into_iter().next())
        .unwrap_or_else(|| UNKNOWN_CAPTION.to_string())
}

/// Split a `REG_MULTI_SZ` buffer into its strings, stopping at the empty string that
/// terminates the list. Anything after the terminator is ignored.
pub fn split_multi_sz(data: &[u16]) -> Vec<String> {
    data.split(|&unit| unit == 0)
        .take_while(|value| !value.is_empty())
        .map(String::from_utf16_lossy)
        .collect()
}

/// Structure packing used by `cfgmgr32.h`: 8-byte alignment on 64-bit targets, byte packing on
/// 32-bit ones. Only `MEM_RANGE` changes shape between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorPacking {
    Natural,
    Packed,
}

impl DescriptorPacking {
    pub const NATIVE: Self = if cfg!(target_pointer_width = "64") {
        DescriptorPacking::Natural
    } else {
        DescriptorPacking::Packed
    };

    /// Offset of `MR_Min` within `MEM_RANGE`.
    const fn mem_range_min_offset(self) -> usize {
        match self {
            DescriptorPacking::Natural => 16,
            DescriptorPacking::Packed => 12,
        }
    }
}

/// Size of `MEM_DES` / `MEM_LARGE_DES`: count, type, alloc base, alloc end, flags, reserved.
const MEM_DES_SIZE: usize = 32;
const DES_COUNT_OFFSET: usize = 0;
const DES_ALLOC_BASE_OFFSET: usize = 8;
/// Offset of `MLR_Min` within `MEM_LARGE_RANGE` (align and length are both 64-bit).
const MEM_LARGE_RANGE_MIN_OFFSET: usize = 16;

/// Base address described by one memory resource descriptor.
///
/// Prefers the allocated base from the header and falls back to the first range's minimum. A
/// zero result, or a buffer too short to hold the fields, yields `None`.
pub fn descriptor_base(resource: &MemoryResource, packing: DescriptorPacking) -> Option<u64> {
    let data = &resource.data;
    if data.len() < MEM_DES_SIZE {
        return None;
    }

    let count = read_u32(data, DES_COUNT_OFFSET)?;
    let mut base = read_u64(data, DES_ALLOC_BASE_OFFSET)?;
    if base == 0 && count > 0 {
        let min_offset = match resource.kind {
            MemoryResourceKind::Mem => packing.mem_range_min_offset(),
            MemoryResourceKind::MemLarge => MEM_LARGE_RANGE_MIN_OFFSET,
        };
        base = read_u64(data, MEM_DES_SIZE + min_offset).unwrap_or(0);
    }

    (base != 0).then_some(base)
}

/// Lowest base across all descriptors; ties keep the first one seen.
pub fn lowest_memory_base(
    resources: &[MemoryResource],
    packing: DescriptorPacking,
) -> Result<u64, BaseAddressError> {
    resources
        .iter()
        .filter_map(|resource| descriptor_base(resource, packing))
        .min()
        .ok_or(BaseAddressError::NoMemoryResource)
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset + 8)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}
