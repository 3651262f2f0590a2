// Shared test doubles (integration tests compile as separate crates, so keep common code in a
// submodule to avoid it becoming its own test target).
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use xhci_imod::discovery::{
    BaseAddressError, DeviceProperty, DeviceTree, MemoryResource, MemoryResourceKind,
};
use xhci_imod::winio::{
    physmem, AccessError, DriverChannel, PhysStruct, RegisterAccess, ServiceControl, ServiceState,
    StartOutcome,
};
use xhci_imod::PlatformError;

const ERROR_ACCESS_DENIED: u32 = 5;
const ERROR_SERVICE_DOES_NOT_EXIST: u32 = 1060;

/// Physical memory backed by real, never-freed cells so a mapped linear address stays valid for
/// the rest of the test.
#[derive(Debug, Default)]
pub struct PhysMemory {
    cells: HashMap<u64, &'static Cell<u32>>,
}

impl PhysMemory {
    pub fn cell(&mut self, address: u64) -> &'static Cell<u32> {
        self.cells
            .entry(address)
            .or_insert_with(|| Box::leak(Box::new(Cell::new(0))))
    }

    pub fn set(&mut self, address: u64, value: u32) {
        self.cell(address).set(value);
    }

    pub fn get(&self, address: u64) -> Option<u32> {
        self.cells.get(&address).map(|cell| cell.get())
    }
}

/// Everything the fake host remembers, shared between the service double and its channel.
#[derive(Debug, Default)]
pub struct FakeHost {
    pub installed: bool,
    pub running: bool,
    /// Polls after a stop request before the service reports stopped; `None` never stops.
    pub stop_after_polls: Option<u32>,
    pub fail_query: bool,
    pub fail_start: bool,
    pub fail_open_channel: bool,
    pub fail_enable_direct_io: bool,
    pub image_path: Option<PathBuf>,

    pub calls: Vec<&'static str>,
    pub sleeps: Vec<Duration>,

    pub memory: PhysMemory,
    pub fail_map: HashSet<u64>,
    pub null_map: HashSet<u64>,
    pub fail_unmap: HashSet<u64>,
    pub maps: Vec<PhysStruct>,
    pub unmaps: Vec<PhysStruct>,

    pending_stop: Option<u32>,
    next_handle: u64,
}

impl FakeHost {
    pub fn shared() -> Rc<RefCell<FakeHost>> {
        Rc::new(RefCell::new(FakeHost::default()))
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }

    /// Mappings handed out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.maps.len() - self.unmaps.len()
    }
}

pub struct FakeServices {
    pub host: Rc<RefCell<FakeHost>>,
}

impl FakeServices {
    pub fn new(host: &Rc<RefCell<FakeHost>>) -> Self {
        Self { host: host.clone() }
    }
}

impl ServiceControl for FakeServices {
    type Service = ();
    type Channel = FakeChannel;

    fn open_service(&mut self, _name: &str) -> Result<Option<()>, PlatformError> {
        let mut host = self.host.borrow_mut();
        host.calls.push("open_service");
        Ok(host.installed.then_some(()))
    }

    fn create_service(&mut self, _name: &str, image_path: &Path) -> Result<(), PlatformError> {
        let mut host = self.host.borrow_mut();
        host.calls.push("create_service");
        host.installed = true;
        host.image_path = Some(image_path.to_path_buf());
        Ok(())
    }

    fn query_state(&mut self, _service: &()) -> Result<ServiceState, PlatformError> {
        let mut host = self.host.borrow_mut();
        host.calls.push("query_state");
        if !host.installed {
            return Err(PlatformError::Win32(ERROR_SERVICE_DOES_NOT_EXIST));
        }
        if host.fail_query {
            return Err(PlatformError::Win32(ERROR_ACCESS_DENIED));
        }
        match host.pending_stop {
            Some(0) => {
                host.pending_stop = None;
                host.running = false;
            }
            Some(remaining) => host.pending_stop = Some(remaining - 1),
            None => {}
        }
        Ok(if host.running {
            ServiceState::Running
        } else {
            ServiceState::Stopped
        })
    }

    fn start_service(&mut self, _service: &()) -> Result<StartOutcome, PlatformError> {
        let mut host = self.host.borrow_mut();
        host.calls.push("start_service");
        if host.fail_start {
            return Err(PlatformError::Win32(ERROR_ACCESS_DENIED));
        }
        if host.running {
            return Ok(StartOutcome::AlreadyRunning);
        }
        host.running = true;
        Ok(StartOutcome::Started)
    }

    fn stop_service(&mut self, _service: &()) -> Result<(), PlatformError> {
        let mut host = self.host.borrow_mut();
        host.calls.push("stop_service");
        host.pending_stop = host.stop_after_polls;
        Ok(())
    }

    fn delete_service(&mut self, _service: &()) -> Result<(), PlatformError> {
        let mut host = self.host.borrow_mut();
        host.calls.push("delete_service");
        host.installed = false;
        Ok(())
    }

    fn open_channel(&mut self) -> Result<FakeChannel, PlatformError> {
        let mut host = self.host.borrow_mut();
        host.calls.push("open_channel");
        if host.fail_open_channel {
            return Err(PlatformError::Win32(ERROR_ACCESS_DENIED));
        }
        Ok(FakeChannel {
            host: self.host.clone(),
        })
    }

    fn sleep(&mut self, duration: Duration) {
        self.host.borrow_mut().sleeps.push(duration);
    }
}

pub struct FakeChannel {
    pub host: Rc<RefCell<FakeHost>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self {
            host: FakeHost::shared(),
        }
    }
}

impl Drop for FakeChannel {
    fn drop(&mut self) {
        self.host.borrow_mut().calls.push("close_channel");
    }
}

// SAFETY: linear addresses point at leaked cells that are never freed.
unsafe impl DriverChannel for FakeChannel {
    fn enable_direct_io(&mut self) -> Result<(), PlatformError> {
        let mut host = self.host.borrow_mut();
        host.calls.push("enable_direct_io");
        if host.fail_enable_direct_io {
            return Err(PlatformError::Win32(ERROR_ACCESS_DENIED));
        }
        Ok(())
    }

    fn disable_direct_io(&mut self) -> Result<(), PlatformError> {
        self.host.borrow_mut().calls.push("disable_direct_io");
        Ok(())
    }

    fn map_physical(&mut self, request: PhysStruct) -> Result<PhysStruct, PlatformError> {
        let mut host = self.host.borrow_mut();
        let address = request.phys_address;
        if host.fail_map.contains(&address) {
            return Err(PlatformError::Win32(ERROR_ACCESS_DENIED));
        }
        host.next_handle += 1;
        let linear_address = if host.null_map.contains(&address) {
            0
        } else {
            host.memory.cell(address).as_ptr() as usize as u64
        };
        let mapping = PhysStruct {
            phys_memory_handle: host.next_handle,
            linear_address,
            phys_section: host.next_handle,
            ..request
        };
        if linear_address != 0 {
            host.maps.push(mapping);
        }
        Ok(mapping)
    }

    fn unmap_physical(&mut self, mapping: &PhysStruct) -> Result<(), PlatformError> {
        let mut host = self.host.borrow_mut();
        host.unmaps.push(*mapping);
        if host.fail_unmap.contains(&mapping.phys_address) {
            return Err(PlatformError::Win32(ERROR_ACCESS_DENIED));
        }
        Ok(())
    }
}

impl RegisterAccess for FakeChannel {
    fn read_dword(&mut self, address: u64) -> Result<u32, AccessError> {
        physmem::read_dword(self, address)
    }

    fn write_dword(&mut self, address: u64, value: u32) -> Result<(), AccessError> {
        physmem::write_dword(self, address, value)
    }
}

/// Register file that records every access in order.
#[derive(Debug, Default)]
pub struct RecordingRegisters {
    pub values: HashMap<u64, u32>,
    pub fail_read: HashSet<u64>,
    pub fail_write: HashSet<u64>,
    pub reads: Vec<u64>,
    pub writes: Vec<(u64, u32)>,
}

impl RecordingRegisters {
    /// A healthy controller at `base` with the default register offsets.
    pub fn controller(base: u64, hcsparams1: u32, rtsoff: u32) -> Self {
        let mut regs = Self::default();
        regs.values.insert(base + 0x04, hcsparams1);
        regs.values.insert(base + 0x18, rtsoff);
        regs
    }

    pub fn with_controller(mut self, base: u64, hcsparams1: u32, rtsoff: u32) -> Self {
        self.values.insert(base + 0x04, hcsparams1);
        self.values.insert(base + 0x18, rtsoff);
        self
    }

    pub fn written_to(&self, range: std::ops::Range<u64>) -> Vec<(u64, u32)> {
        self.writes
            .iter()
            .copied()
            .filter(|(address, _)| range.contains(address))
            .collect()
    }
}

impl RegisterAccess for RecordingRegisters {
    fn read_dword(&mut self, address: u64) -> Result<u32, AccessError> {
        self.reads.push(address);
        if self.fail_read.contains(&address) {
            return Err(AccessError::Map(PlatformError::Win32(ERROR_ACCESS_DENIED)));
        }
        Ok(self.values.get(&address).copied().unwrap_or(0))
    }

    fn write_dword(&mut self, address: u64, value: u32) -> Result<(), AccessError> {
        self.writes.push((address, value));
        if self.fail_write.contains(&address) {
            return Err(AccessError::Unmap(PlatformError::Win32(ERROR_ACCESS_DENIED)));
        }
        self.values.insert(address, value);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    pub service: Option<String>,
    pub hardware_ids: Vec<String>,
    pub compatible_ids: Vec<String>,
    pub friendly_name: Option<String>,
    pub description: Option<String>,
    pub instance_id: Option<String>,
    pub problem_code: Option<u32>,
    pub resources: Option<Result<Vec<MemoryResource>, BaseAddressError>>,
}

impl FakeDevice {
    /// A USBXHCI-bound controller with one memory range at `base`.
    pub fn xhci(instance_id: &str, base: u64) -> Self {
        Self {
            service: Some("USBXHCI".to_string()),
            hardware_ids: vec![instance_id.split('\\').take(2).collect::<Vec<_>>().join("\\")],
            friendly_name: Some("USB xHCI Compliant Host Controller".to_string()),
            instance_id: Some(instance_id.to_string()),
            problem_code: Some(0),
            resources: Some(Ok(vec![mem_resource(base)])),
            ..Self::default()
        }
    }
}

/// `MEM_DES` header with an allocated base and no ranges.
pub fn mem_resource(alloc_base: u64) -> MemoryResource {
    let mut data = Vec::new();
    data.extend_from_slice(&0u32.to_le_bytes()); // MD_Count
    data.extend_from_slice(&0u32.to_le_bytes()); // MD_Type
    data.extend_from_slice(&alloc_base.to_le_bytes());
    data.extend_from_slice(&(alloc_base + 0xffff).to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes()); // MD_Flags
    data.extend_from_slice(&0u32.to_le_bytes()); // MD_Reserved
    MemoryResource {
        kind: MemoryResourceKind::Mem,
        data,
    }
}

#[derive(Debug, Default)]
pub struct FakeTree {
    pub devices: Vec<FakeDevice>,
    /// Enumeration fails at this index.
    pub fail_at: Option<u32>,
}

impl DeviceTree for FakeTree {
    type Device = usize;

    fn device(&mut self, index: u32) -> Result<Option<usize>, PlatformError> {
        if self.fail_at == Some(index) {
            return Err(PlatformError::Win32(ERROR_ACCESS_DENIED));
        }
        let index = index as usize;
        Ok((index < self.devices.len()).then_some(index))
    }

    fn property(&mut self, device: &usize, property: DeviceProperty) -> Vec<String> {
        let device = &self.devices[*device];
        match property {
            DeviceProperty::Service => device.service.iter().cloned().collect(),
            DeviceProperty::HardwareIds => device.hardware_ids.clone(),
            DeviceProperty::CompatibleIds => device.compatible_ids.clone(),
            DeviceProperty::FriendlyName => device.friendly_name.iter().cloned().collect(),
            DeviceProperty::DeviceDescription => device.description.iter().cloned().collect(),
        }
    }

    fn instance_id(&mut self, device: &usize) -> Option<String> {
        self.devices[*device].instance_id.clone()
    }

    fn problem_code(&mut self, device: &usize) -> Option<u32> {
        self.devices[*device].problem_code
    }

    fn memory_resources(
        &mut self,
        device: &usize,
    ) -> Result<Vec<MemoryResource>, BaseAddressError> {
        self.devices[*device]
            .resources
            .clone()
            .unwrap_or(Err(BaseAddressError::LogicalConfig { code: 0x25 }))
    }
}
