//! Service Control Manager and `\\.\WINIO` device implementations.

use std::ffi::{c_void, OsStr};
use std::path::Path;

use windows::core::PCWSTR;
use windows::Win32::Foundation::{
    CloseHandle, ERROR_SERVICE_ALREADY_RUNNING, ERROR_SERVICE_DOES_NOT_EXIST, GENERIC_READ,
    GENERIC_WRITE, HANDLE,
};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Services::{
    CloseServiceHandle, ControlService, CreateServiceW, DeleteService, OpenSCManagerW,
    OpenServiceW, QueryServiceStatusEx, StartServiceW, SC_HANDLE, SC_MANAGER_ALL_ACCESS,
    SC_STATUS_PROCESS_INFO, SERVICE_ALL_ACCESS, SERVICE_CONTROL_STOP, SERVICE_DEMAND_START,
    SERVICE_ERROR_NORMAL, SERVICE_KERNEL_DRIVER, SERVICE_RUNNING, SERVICE_STATUS,
    SERVICE_STATUS_PROCESS, SERVICE_STOPPED,
};
use windows::Win32::System::IO::DeviceIoControl;

use super::protocol::{
    DriverChannel, PhysStruct, IOCTL_WINIO_DISABLEDIRECTIO, IOCTL_WINIO_ENABLEDIRECTIO,
    IOCTL_WINIO_MAPPHYSTOLIN, IOCTL_WINIO_UNMAPPHYSADDR,
};
use super::session::{ServiceControl, ServiceState, StartOutcome};
use super::{SessionError, DEVICE_PATH};
use crate::error::PlatformError;

#[derive(Debug)]
pub struct OwnedScHandle(SC_HANDLE);

impl Drop for OwnedScHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseServiceHandle(self.0);
        }
    }
}

/// The local Service Control Manager.
#[derive(Debug)]
pub struct WinIoPlatform {
    manager: OwnedScHandle,
}

impl WinIoPlatform {
    pub fn connect() -> Result<Self, SessionError> {
        let manager =
            unsafe { OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), SC_MANAGER_ALL_ACCESS) }
                .map_err(|err| SessionError::ServiceManager(err.into()))?;
        Ok(Self {
            manager: OwnedScHandle(manager),
        })
    }
}

impl ServiceControl for WinIoPlatform {
    type Service = OwnedScHandle;
    type Channel = WinIoDevice;

    fn open_service(&mut self, name: &str) -> Result<Option<OwnedScHandle>, PlatformError> {
        let wide = to_wide(name);
        match unsafe { OpenServiceW(self.manager.0, PCWSTR(wide.as_ptr()), SERVICE_ALL_ACCESS) } {
            Ok(handle) => Ok(Some(OwnedScHandle(handle))),
            Err(err) if err.code() == ERROR_SERVICE_DOES_NOT_EXIST.to_hresult() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn create_service(
        &mut self,
        name: &str,
        image_path: &Path,
    ) -> Result<OwnedScHandle, PlatformError> {
        let wide_name = to_wide(name);
        let wide_path = to_wide(image_path);
        let handle = unsafe {
            CreateServiceW(
                self.manager.0,
                PCWSTR(wide_name.as_ptr()),
                PCWSTR(wide_name.as_ptr()),
                SERVICE_ALL_ACCESS,
                SERVICE_KERNEL_DRIVER,
                SERVICE_DEMAND_START,
                SERVICE_ERROR_NORMAL,
                PCWSTR(wide_path.as_ptr()),
                PCWSTR::null(),
                None,
                PCWSTR::null(),
                PCWSTR::null(),
                PCWSTR::null(),
            )
        }?;
        Ok(OwnedScHandle(handle))
    }

    fn query_state(&mut self, service: &OwnedScHandle) -> Result<ServiceState, PlatformError> {
        let mut status = SERVICE_STATUS_PROCESS::default();
        let mut needed = 0u32;
        // SAFETY: the slice covers exactly `status`, which outlives the call.
        let buffer = unsafe {
            std::slice::from_raw_parts_mut(
                (&mut status as *mut SERVICE_STATUS_PROCESS).cast::<u8>(),
                std::mem::size_of::<SERVICE_STATUS_PROCESS>(),
            )
        };
        unsafe {
            QueryServiceStatusEx(service.0, SC_STATUS_PROCESS_INFO, Some(buffer), &mut needed)
        }?;

        Ok(match status.dwCurrentState {
            SERVICE_STOPPED => ServiceState::Stopped,
            SERVICE_RUNNING => ServiceState::Running,
            other => ServiceState::Other(other.0),
        })
    }

    fn start_service(&mut self, service: &OwnedScHandle) -> Result<StartOutcome, PlatformError> {
        match unsafe { StartServiceW(service.0, None) } {
            Ok(()) => Ok(StartOutcome::Started),
            Err(err) if err.code() == ERROR_SERVICE_ALREADY_RUNNING.to_hresult() => {
                Ok(StartOutcome::AlreadyRunning)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn stop_service(&mut self, service: &OwnedScHandle) -> Result<(), PlatformError> {
        let mut status = SERVICE_STATUS::default();
        unsafe { ControlService(service.0, SERVICE_CONTROL_STOP, &mut status) }?;
        Ok(())
    }

    fn delete_service(&mut self, service: &OwnedScHandle) -> Result<(), PlatformError> {
        unsafe { DeleteService(service.0) }?;
        Ok(())
    }

    fn open_channel(&mut self) -> Result<WinIoDevice, PlatformError> {
        WinIoDevice::open()
    }
}

/// Open handle to `\\.\WINIO`.
#[derive(Debug)]
pub struct WinIoDevice(HANDLE);

impl WinIoDevice {
    pub fn open() -> Result<Self, PlatformError> {
        let wide = to_wide(DEVICE_PATH);
        let handle = unsafe {
            CreateFileW(
                PCWSTR(wide.as_ptr()),
                (GENERIC_READ | GENERIC_WRITE).0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                None,
            )
        }?;
        Ok(Self(handle))
    }

    fn control(&self, code: u32, buffer: Option<&mut PhysStruct>) -> Result<(), PlatformError> {
        let mut returned = 0u32;
        let (ptr, len) = match buffer {
            Some(buffer) => (
                (buffer as *mut PhysStruct).cast::<c_void>(),
                std::mem::size_of::<PhysStruct>() as u32,
            ),
            None => (std::ptr::null_mut(), 0),
        };
        let (input, output) = if len == 0 {
            (None, None)
        } else {
            (Some(ptr.cast_const()), Some(ptr))
        };
        unsafe { DeviceIoControl(self.0, code, input, len, output, len, Some(&mut returned), None) }?;
        Ok(())
    }
}

impl Drop for WinIoDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

// SAFETY: the driver maps the requested physical range into this process and returns its base
// as `linear_address`; the view stays valid until the matching unmap request.
unsafe impl DriverChannel for WinIoDevice {
    fn enable_direct_io(&mut self) -> Result<(), PlatformError> {
        self.control(IOCTL_WINIO_ENABLEDIRECTIO, None)
    }

    fn disable_direct_io(&mut self) -> Result<(), PlatformError> {
        self.control(IOCTL_WINIO_DISABLEDIRECTIO, None)
    }

    fn map_physical(&mut self, request: PhysStruct) -> Result<PhysStruct, PlatformError> {
        let mut phys = request;
        self.control(IOCTL_WINIO_MAPPHYSTOLIN, Some(&mut phys))?;
        Ok(phys)
    }

    fn unmap_physical(&mut self, mapping: &PhysStruct) -> Result<(), PlatformError> {
        let mut phys = *mapping;
        self.control(IOCTL_WINIO_UNMAPPHYSADDR, Some(&mut phys))
    }
}

fn to_wide(s: impl AsRef<OsStr>) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    let mut wide: Vec<u16> = s.as_ref().encode_wide().collect();
    wide.push(0);
    wide
}
