//! Transport over the `AsrOmgDrv` kernel driver.
//!
//! The driver exposes physical memory, contiguous allocations and MSR access
//! through buffered IOCTLs. It has no way to free an allocation.

use crate::transport::{AffinityMask, ContiguousAllocation, DriverTransport};
use crate::TransportError;
use data_types::addresses::{CoreIndex, PhysicalAddress, VirtualAddress};
use log::{debug, warn};
use std::ffi::c_void;
use std::io;
use std::mem::size_of;
use windows::core::w;
use windows::Win32::Foundation::{
    CloseHandle, ERROR_GEN_FAILURE, ERROR_NOACCESS, GENERIC_READ, GENERIC_WRITE, HANDLE,
};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_MODE, OPEN_EXISTING,
};
use windows::Win32::System::Threading::{GetCurrentThread, SetThreadAffinityMask};
use windows::Win32::System::IO::DeviceIoControl;

pub const DEVICE_PATH: &str = r"\\.\AsrOmgDrv";

const IOCTL_READ_PHYSICAL: u32 = 0x0022_2808;
const IOCTL_WRITE_PHYSICAL: u32 = 0x0022_280c;
const IOCTL_RDMSR: u32 = 0x0022_2848;
const IOCTL_WRMSR: u32 = 0x0022_284c;
const IOCTL_ALLOCATE: u32 = 0x0022_2880;

/// Errors the driver reports when the wrmsr itself faulted, as opposed to
/// the request never reaching it
const REFUSED_WRITE_ERRORS: [u32; 2] = [ERROR_GEN_FAILURE.0, ERROR_NOACCESS.0];

fn is_refused_write(err: &TransportError) -> bool {
    match err {
        TransportError::Ioctl { source, .. } => source
            .raw_os_error()
            .is_some_and(|code| REFUSED_WRITE_ERRORS.contains(&(code as u32))),
        _ => false,
    }
}

#[repr(C)]
#[derive(Default)]
struct AllocateRequest {
    size: u32,
    physical: u32,
    virtual_address: u64,
}

#[repr(C)]
struct PhysicalRequest {
    physical: u64,
    size: u32,
    value_size: u32,
    data: *mut c_void,
}

#[repr(C)]
#[derive(Default)]
struct MsrRequest {
    low: u32,
    padding: u32,
    msr: u32,
    high: u32,
}

impl MsrRequest {
    fn value(&self) -> u64 {
        ((self.high as u64) << 32) | self.low as u64
    }
}

/// Open handle to the driver, closed on drop
pub struct AsrDriver {
    handle: HANDLE,
}

impl AsrDriver {
    pub fn open() -> Result<AsrDriver, TransportError> {
        let handle = unsafe {
            CreateFileW(
                w!(r"\\.\AsrOmgDrv"),
                (GENERIC_READ | GENERIC_WRITE).0,
                FILE_SHARE_MODE(0),
                None,
                OPEN_EXISTING,
                FILE_FLAGS_AND_ATTRIBUTES(0),
                None,
            )
        }
        .map_err(|err| TransportError::Open {
            device: DEVICE_PATH,
            source: err.into(),
        })?;

        debug!("opened {} with handle {:?}", DEVICE_PATH, handle);
        Ok(AsrDriver { handle })
    }

    /// Sends `request` as both input and output buffer of `code`
    fn ioctl<R>(&self, code: u32, request: &mut R) -> Result<(), TransportError> {
        let size = size_of::<R>() as u32;
        let buffer = request as *mut R as *mut c_void;
        let mut returned = 0u32;
        unsafe {
            DeviceIoControl(
                self.handle,
                code,
                Some(buffer as *const c_void),
                size,
                Some(buffer),
                size,
                Some(&mut returned),
                None,
            )
        }
        .map_err(|err| TransportError::Ioctl {
            code,
            source: err.into(),
        })
    }

    fn physical_request(
        code: u32,
        address: PhysicalAddress,
        data: *mut c_void,
        len: usize,
    ) -> Result<PhysicalRequest, TransportError> {
        let size = u32::try_from(len).map_err(|_| TransportError::Ioctl {
            code,
            source: io::Error::new(io::ErrorKind::InvalidInput, "transfer larger than 4 GiB"),
        })?;
        Ok(PhysicalRequest {
            physical: address.into(),
            size,
            value_size: 1,
            data,
        })
    }
}

impl Drop for AsrDriver {
    fn drop(&mut self) {
        if unsafe { CloseHandle(self.handle) }.is_ok() {
            debug!("closed driver handle {:?}", self.handle);
        }
    }
}

impl DriverTransport for AsrDriver {
    fn set_affinity(&mut self, core: CoreIndex) -> Result<AffinityMask, TransportError> {
        let previous = unsafe { SetThreadAffinityMask(GetCurrentThread(), core.affinity_mask() as usize) };
        if previous == 0 {
            return Err(TransportError::SetAffinity {
                core,
                source: io::Error::last_os_error(),
            });
        }
        Ok(AffinityMask(previous as u64))
    }

    fn restore_affinity(&mut self, previous: AffinityMask) -> Result<(), TransportError> {
        if unsafe { SetThreadAffinityMask(GetCurrentThread(), previous.0 as usize) } == 0 {
            return Err(TransportError::RestoreAffinity {
                mask: previous,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn allocate_contiguous(&mut self, len: usize) -> Result<ContiguousAllocation, TransportError> {
        let size = u32::try_from(len).map_err(|_| TransportError::Allocation {
            len,
            reason: "the driver allocates at most 4 GiB".into(),
        })?;

        let mut request = AllocateRequest {
            size,
            ..Default::default()
        };
        self.ioctl(IOCTL_ALLOCATE, &mut request)?;

        if request.virtual_address == 0 {
            return Err(TransportError::Allocation {
                len,
                reason: "driver returned a null mapping".into(),
            });
        }

        let allocation = ContiguousAllocation {
            physical: PhysicalAddress::from(request.physical as u64),
            virtual_address: VirtualAddress::from(request.virtual_address),
            len,
        };
        debug!(
            "allocated {} bytes at physical address {} and virtual address {}",
            len, allocation.physical, allocation.virtual_address
        );
        Ok(allocation)
    }

    fn release_contiguous(&mut self, allocation: ContiguousAllocation) -> Result<(), TransportError> {
        debug!(
            "leaving {} bytes at {} to the driver, it cannot free them",
            allocation.len, allocation.physical
        );
        Ok(())
    }

    fn read_physical(&mut self, address: PhysicalAddress, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut request =
            Self::physical_request(IOCTL_READ_PHYSICAL, address, buf.as_mut_ptr() as *mut c_void, buf.len())?;
        self.ioctl(IOCTL_READ_PHYSICAL, &mut request)?;
        debug!("read {} bytes from physical address {}", buf.len(), address);
        Ok(())
    }

    fn write_physical(&mut self, address: PhysicalAddress, buf: &[u8]) -> Result<(), TransportError> {
        // the driver only reads through the pointer for a write
        let mut request =
            Self::physical_request(IOCTL_WRITE_PHYSICAL, address, buf.as_ptr() as *mut c_void, buf.len())?;
        self.ioctl(IOCTL_WRITE_PHYSICAL, &mut request)?;
        debug!("wrote {} bytes to physical address {}", buf.len(), address);
        Ok(())
    }

    fn read_msr(&mut self, core: CoreIndex, msr: u32) -> Result<u64, TransportError> {
        let mut request = MsrRequest {
            msr,
            ..Default::default()
        };
        self.ioctl(IOCTL_RDMSR, &mut request)?;
        let value = request.value();
        debug!("read msr {:#x} on core {}, value {:#x}", msr, core, value);
        Ok(value)
    }

    fn write_msr(&mut self, core: CoreIndex, msr: u32, value: u64) -> Result<bool, TransportError> {
        let mut request = MsrRequest {
            low: value as u32,
            msr,
            high: (value >> 32) as u32,
            ..Default::default()
        };
        match self.ioctl(IOCTL_WRMSR, &mut request) {
            Ok(()) => {
                debug!("wrote msr {:#x} on core {}, value {:#x}", msr, core, value);
                Ok(true)
            }
            Err(err) if is_refused_write(&err) => {
                warn!("core {} refused the write of {:#x} to msr {:#x}: {}", core, value, msr, err);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}
