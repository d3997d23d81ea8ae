use crate::TransportError;
use data_types::addresses::{CoreIndex, PhysicalAddress, VirtualAddress};
use std::fmt;

/// MSR holding the patch revision the core currently runs
pub const MSR_PATCH_LEVEL: u32 = 0x0000_008b;

/// MSR that triggers a patch load from the written virtual address
pub const MSR_PATCH_LOADER: u32 = 0xc001_0020;

/// Thread affinity mask as handed back by the platform when pinning
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AffinityMask(pub u64);

impl fmt::Display for AffinityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for AffinityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AffinityMask({:#x})", self.0)
    }
}

/// Physically contiguous driver memory, visible at both addresses
#[derive(Debug, PartialEq, Eq)]
pub struct ContiguousAllocation {
    pub physical: PhysicalAddress,
    pub virtual_address: VirtualAddress,
    pub len: usize,
}

/// Privileged operations offered by the kernel driver.
///
/// All calls block until the driver answers. MSR accesses act on whatever core
/// the calling thread runs on; the `core` argument only names it, pinning is
/// the caller's job (see [`crate::on_core`]).
pub trait DriverTransport {
    /// Pins the calling thread to `core`, returning the mask it had before
    fn set_affinity(&mut self, core: CoreIndex) -> Result<AffinityMask, TransportError>;

    fn restore_affinity(&mut self, previous: AffinityMask) -> Result<(), TransportError>;

    fn allocate_contiguous(&mut self, len: usize) -> Result<ContiguousAllocation, TransportError>;

    fn release_contiguous(&mut self, allocation: ContiguousAllocation) -> Result<(), TransportError>;

    fn read_physical(&mut self, address: PhysicalAddress, buf: &mut [u8]) -> Result<(), TransportError>;

    fn write_physical(&mut self, address: PhysicalAddress, buf: &[u8]) -> Result<(), TransportError>;

    fn read_msr(&mut self, core: CoreIndex, msr: u32) -> Result<u64, TransportError>;

    /// Writes `value` to `msr`. `Ok(false)` means the processor refused the write.
    fn write_msr(&mut self, core: CoreIndex, msr: u32, value: u64) -> Result<bool, TransportError>;
}

impl<T: DriverTransport + ?Sized> DriverTransport for Box<T> {
    fn set_affinity(&mut self, core: CoreIndex) -> Result<AffinityMask, TransportError> {
        (**self).set_affinity(core)
    }

    fn restore_affinity(&mut self, previous: AffinityMask) -> Result<(), TransportError> {
        (**self).restore_affinity(previous)
    }

    fn allocate_contiguous(&mut self, len: usize) -> Result<ContiguousAllocation, TransportError> {
        (**self).allocate_contiguous(len)
    }

    fn release_contiguous(&mut self, allocation: ContiguousAllocation) -> Result<(), TransportError> {
        (**self).release_contiguous(allocation)
    }

    fn read_physical(&mut self, address: PhysicalAddress, buf: &mut [u8]) -> Result<(), TransportError> {
        (**self).read_physical(address, buf)
    }

    fn write_physical(&mut self, address: PhysicalAddress, buf: &[u8]) -> Result<(), TransportError> {
        (**self).write_physical(address, buf)
    }

    fn read_msr(&mut self, core: CoreIndex, msr: u32) -> Result<u64, TransportError> {
        (**self).read_msr(core, msr)
    }

    fn write_msr(&mut self, core: CoreIndex, msr: u32, value: u64) -> Result<bool, TransportError> {
        (**self).write_msr(core, msr, value)
    }
}
