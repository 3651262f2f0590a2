//! SetupAPI / CfgMgr32 implementation of [`DeviceTree`].

use std::ffi::c_void;

use windows::core::w;
use windows::Win32::Devices::DeviceAndDriverInstallation::{
    CM_Free_Log_Conf_Handle, CM_Free_Res_Des_Handle, CM_Get_DevNode_Status,
    CM_Get_First_Log_Conf, CM_Get_Next_Res_Des, CM_Get_Res_Des_Data, CM_Get_Res_Des_Data_Size,
    ResType_Mem, ResType_MemLarge, SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInfo,
    SetupDiGetClassDevsW, SetupDiGetDeviceInstanceIdW, SetupDiGetDeviceRegistryPropertyW,
    ALLOC_LOG_CONF, BOOT_LOG_CONF, CM_DEVNODE_STATUS_FLAGS, CM_PROB, CM_RESTYPE, CR_SUCCESS,
    DIGCF_ALLCLASSES, DIGCF_PRESENT, HDEVINFO, SETUP_DI_REGISTRY_PROPERTY, SPDRP_COMPATIBLEIDS,
    SPDRP_DEVICEDESC, SPDRP_FRIENDLYNAME, SPDRP_HARDWAREID, SPDRP_SERVICE, SP_DEVINFO_DATA,
};
use windows::Win32::Foundation::{ERROR_INSUFFICIENT_BUFFER, ERROR_NO_MORE_ITEMS};
use windows::Win32::System::Registry::{REG_MULTI_SZ, REG_SZ};

use super::{
    split_multi_sz, BaseAddressError, DeviceProperty, DeviceTree, DiscoveryError, MemoryResource,
    MemoryResourceKind,
};
use crate::error::PlatformError;

/// Present PCI devices of all setup classes.
#[derive(Debug)]
pub struct SetupDiDeviceTree {
    set: HDEVINFO,
}

impl SetupDiDeviceTree {
    pub fn open() -> Result<Self, DiscoveryError> {
        let set = unsafe {
            SetupDiGetClassDevsW(None, w!("PCI"), None, DIGCF_PRESENT | DIGCF_ALLCLASSES)
        }
        .map_err(|err| DiscoveryError::OpenDeviceList(err.into()))?;
        Ok(Self { set })
    }
}

impl Drop for SetupDiDeviceTree {
    fn drop(&mut self) {
        unsafe {
            let _ = SetupDiDestroyDeviceInfoList(self.set);
        }
    }
}

/// Enumerate xHCI controllers on this machine.
pub fn discover_system() -> Result<Vec<super::ControllerRecord>, DiscoveryError> {
    let mut tree = SetupDiDeviceTree::open()?;
    super::discover(&mut tree)
}

impl DeviceTree for SetupDiDeviceTree {
    type Device = SP_DEVINFO_DATA;

    fn device(&mut self, index: u32) -> Result<Option<SP_DEVINFO_DATA>, PlatformError> {
        let mut info = SP_DEVINFO_DATA {
            cbSize: std::mem::size_of::<SP_DEVINFO_DATA>() as u32,
            ..Default::default()
        };
        match unsafe { SetupDiEnumDeviceInfo(self.set, index, &mut info) } {
            Ok(()) => Ok(Some(info)),
            Err(err) if err.code() == ERROR_NO_MORE_ITEMS.to_hresult() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn property(&mut self, device: &SP_DEVINFO_DATA, property: DeviceProperty) -> Vec<String> {
        let property = match property {
            DeviceProperty::Service => SPDRP_SERVICE,
            DeviceProperty::HardwareIds => SPDRP_HARDWAREID,
            DeviceProperty::CompatibleIds => SPDRP_COMPATIBLEIDS,
            DeviceProperty::FriendlyName => SPDRP_FRIENDLYNAME,
            DeviceProperty::DeviceDescription => SPDRP_DEVICEDESC,
        };
        registry_strings(self.set, device, property).unwrap_or_default()
    }

    fn instance_id(&mut self, device: &SP_DEVINFO_DATA) -> Option<String> {
        let mut required = 0u32;
        match unsafe { SetupDiGetDeviceInstanceIdW(self.set, device, None, Some(&mut required)) } {
            Err(err) if err.code() == ERROR_INSUFFICIENT_BUFFER.to_hresult() => {}
            _ => return None,
        }
        if required == 0 {
            return None;
        }

        let mut buf = vec![0u16; required as usize];
        unsafe { SetupDiGetDeviceInstanceIdW(self.set, device, Some(&mut buf), None) }.ok()?;
        let len = buf.iter().position(|&unit| unit == 0).unwrap_or(buf.len());
        let id = String::from_utf16_lossy(&buf[..len]);
        (!id.trim().is_empty()).then_some(id)
    }

    fn problem_code(&mut self, device: &SP_DEVINFO_DATA) -> Option<u32> {
        let mut status = CM_DEVNODE_STATUS_FLAGS::default();
        let mut problem = CM_PROB::default();
        let cr = unsafe { CM_Get_DevNode_Status(&mut status, &mut problem, device.DevInst, 0) };
        (cr == CR_SUCCESS).then_some(problem.0)
    }

    fn memory_resources(
        &mut self,
        device: &SP_DEVINFO_DATA,
    ) -> Result<Vec<MemoryResource>, BaseAddressError> {
        let log_conf = LogConf::first(device.DevInst)?;

        let mut resources = Vec::new();
        for (res_type, kind) in [
            (ResType_Mem, MemoryResourceKind::Mem),
            (ResType_MemLarge, MemoryResourceKind::MemLarge),
        ] {
            log_conf.for_each_descriptor(res_type, |data| {
                resources.push(MemoryResource { kind, data });
            });
        }
        Ok(resources)
    }
}

fn registry_strings(
    set: HDEVINFO,
    device: &SP_DEVINFO_DATA,
    property: SETUP_DI_REGISTRY_PROPERTY,
) -> Option<Vec<String>> {
    let mut reg_type = 0u32;
    let mut required = 0u32;
    let probe = unsafe {
        SetupDiGetDeviceRegistryPropertyW(
            set,
            device,
            property,
            Some(&mut reg_type),
            None,
            Some(&mut required),
        )
    };
    if let Err(err) = probe {
        if err.code() != ERROR_INSUFFICIENT_BUFFER.to_hresult() {
            return None;
        }
    }
    if required == 0 {
        return None;
    }

    let mut data = vec![0u8; required as usize];
    unsafe {
        SetupDiGetDeviceRegistryPropertyW(
            set,
            device,
            property,
            Some(&mut reg_type),
            Some(&mut data),
            None,
        )
    }
    .ok()?;

    if reg_type != REG_SZ.0 && reg_type != REG_MULTI_SZ.0 {
        return None;
    }

    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let mut values = split_multi_sz(&units);
    if reg_type == REG_SZ.0 {
        values.truncate(1);
    }
    (!values.is_empty()).then_some(values)
}

/// Owned `LOG_CONF` handle.
struct LogConf(usize);

impl LogConf {
    /// Active configuration, falling back to the boot configuration.
    fn first(dev_inst: u32) -> Result<Self, BaseAddressError> {
        let mut handle = 0usize;
        let mut cr = unsafe { CM_Get_First_Log_Conf(Some(&mut handle), dev_inst, ALLOC_LOG_CONF) };
        if cr != CR_SUCCESS {
            cr = unsafe { CM_Get_First_Log_Conf(Some(&mut handle), dev_inst, BOOT_LOG_CONF) };
        }
        if cr != CR_SUCCESS {
            return Err(BaseAddressError::LogicalConfig { code: cr.0 });
        }
        Ok(Self(handle))
    }

    /// Feed the data of every descriptor of `res_type` to `f`. Unreadable descriptors are
    /// skipped.
    fn for_each_descriptor(&self, res_type: CM_RESTYPE, mut f: impl FnMut(Vec<u8>)) {
        let mut current = 0usize;
        let mut cr = unsafe { CM_Get_Next_Res_Des(&mut current, self.0, res_type, None, 0) };
        while cr == CR_SUCCESS {
            if let Some(data) = descriptor_data(current) {
                f(data);
            }

            let mut next = 0usize;
            cr = unsafe { CM_Get_Next_Res_Des(&mut next, current, res_type, None, 0) };
            unsafe {
                let _ = CM_Free_Res_Des_Handle(current);
            }
            current = next;
        }
    }
}

impl Drop for LogConf {
    fn drop(&mut self) {
        unsafe {
            let _ = CM_Free_Log_Conf_Handle(self.0);
        }
    }
}

fn descriptor_data(res_des: usize) -> Option<Vec<u8>> {
    let mut size = 0u32;
    if unsafe { CM_Get_Res_Des_Data_Size(&mut size, res_des, 0) } != CR_SUCCESS || size == 0 {
        return None;
    }
    let mut data = vec![0u8; size as usize];
    let cr = unsafe { CM_Get_Res_Des_Data(res_des, data.as_mut_ptr().cast::<c_void>(), size, 0) };
    (cr == CR_SUCCESS).then_some(data)
}
