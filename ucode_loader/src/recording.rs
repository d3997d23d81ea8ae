//! In-memory transport that records every call, for exercising the loader

use crate::transport::{AffinityMask, ContiguousAllocation, DriverTransport, MSR_PATCH_LEVEL, MSR_PATCH_LOADER};
use crate::TransportError;
use data_types::addresses::{Address, CoreIndex, PhysicalAddress, VirtualAddress};
use std::collections::{HashMap, VecDeque};
use std::io;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetAffinity(CoreIndex),
    RestoreAffinity(AffinityMask),
    Allocate(usize),
    Release(PhysicalAddress),
    ReadPhysical(PhysicalAddress, usize),
    WritePhysical(PhysicalAddress, Vec<u8>),
    ReadMsr(CoreIndex, u32),
    WriteMsr(CoreIndex, u32, u64),
}

/// Operation that fails with an injected error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    SetAffinity,
    RestoreAffinity,
    Allocate,
    WritePhysical,
    ReadMsr,
    WriteMsr,
}

pub struct RecordingTransport {
    pub calls: Vec<Call>,
    pub fault: Option<Fault>,
    /// Outcome of each patch-loader write in order; empty means rejected
    pub apply_results: VecDeque<bool>,
    pub revision: u64,
    /// Revision reported after an accepted load
    pub loaded_revision: u64,
    pub pinned: Option<CoreIndex>,
    pub memory: HashMap<PhysicalAddress, Vec<u8>>,
    next_physical: u64,
}

impl RecordingTransport {
    pub const INITIAL_MASK: AffinityMask = AffinityMask(0xff);

    const PHYSICAL_BASE: u64 = 0x1_0000_0000;
    const VIRTUAL_OFFSET: u64 = 0xffff_8000_0000_0000;

    pub fn new(revision: u64) -> Self {
        RecordingTransport {
            calls: Vec::new(),
            fault: None,
            apply_results: VecDeque::new(),
            revision,
            loaded_revision: revision + 1,
            pinned: None,
            memory: HashMap::new(),
            next_physical: Self::PHYSICAL_BASE,
        }
    }

    pub fn accepting(revision: u64) -> Self {
        let mut transport = Self::new(revision);
        transport.apply_results.push_back(true);
        transport
    }

    fn fail(&self, fault: Fault) -> Result<(), TransportError> {
        if self.fault == Some(fault) {
            return Err(TransportError::Ioctl {
                code: 0,
                source: io::Error::other(format!("injected {:?} failure", fault)),
            });
        }
        Ok(())
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|call| matches(call)).count()
    }

    /// Every MSR access sits directly between one pin and one restore
    pub fn msr_accesses_are_bracketed(&self) -> bool {
        self.calls.iter().enumerate().all(|(i, call)| match call {
            Call::ReadMsr(core, _) | Call::WriteMsr(core, _, _) => {
                i > 0
                    && self.calls[i - 1] == Call::SetAffinity(*core)
                    && matches!(self.calls.get(i + 1), Some(Call::RestoreAffinity(_)))
            }
            _ => true,
        })
    }

    fn require_pinned(&self, core: CoreIndex) {
        assert_eq!(self.pinned, Some(core), "msr access on {:?} without pinning", core);
    }
}

impl DriverTransport for RecordingTransport {
    fn set_affinity(&mut self, core: CoreIndex) -> Result<AffinityMask, TransportError> {
        self.calls.push(Call::SetAffinity(core));
        if self.fault == Some(Fault::SetAffinity) {
            return Err(TransportError::SetAffinity {
                core,
                source: io::Error::other("injected affinity failure"),
            });
        }
        assert!(self.pinned.is_none(), "nested pin");
        self.pinned = Some(core);
        Ok(Self::INITIAL_MASK)
    }

    fn restore_affinity(&mut self, previous: AffinityMask) -> Result<(), TransportError> {
        self.calls.push(Call::RestoreAffinity(previous));
        if self.fault == Some(Fault::RestoreAffinity) {
            return Err(TransportError::RestoreAffinity {
                mask: previous,
                source: io::Error::other("injected restore failure"),
            });
        }
        self.pinned = None;
        Ok(())
    }

    fn allocate_contiguous(&mut self, len: usize) -> Result<ContiguousAllocation, TransportError> {
        self.calls.push(Call::Allocate(len));
        if self.fault == Some(Fault::Allocate) {
            return Err(TransportError::Allocation {
                len,
                reason: "injected allocation failure".into(),
            });
        }
        let physical = PhysicalAddress::from(self.next_physical);
        self.next_physical += 0x1000;
        self.memory.insert(physical, vec![0; len]);
        Ok(ContiguousAllocation {
            physical,
            virtual_address: VirtualAddress::from(physical.address() + Self::VIRTUAL_OFFSET),
            len,
        })
    }

    fn release_contiguous(&mut self, allocation: ContiguousAllocation) -> Result<(), TransportError> {
        self.calls.push(Call::Release(allocation.physical));
        self.memory.remove(&allocation.physical);
        Ok(())
    }

    fn read_physical(&mut self, address: PhysicalAddress, buf: &mut [u8]) -> Result<(), TransportError> {
        self.calls.push(Call::ReadPhysical(address, buf.len()));
        if let Some(mem) = self.memory.get(&address) {
            buf.copy_from_slice(&mem[..buf.len()]);
        }
        Ok(())
    }

    fn write_physical(&mut self, address: PhysicalAddress, buf: &[u8]) -> Result<(), TransportError> {
        self.calls.push(Call::WritePhysical(address, buf.to_vec()));
        self.fail(Fault::WritePhysical)?;
        if let Some(mem) = self.memory.get_mut(&address) {
            mem[..buf.len()].copy_from_slice(buf);
        }
        Ok(())
    }

    fn read_msr(&mut self, core: CoreIndex, msr: u32) -> Result<u64, TransportError> {
        self.calls.push(Call::ReadMsr(core, msr));
        self.require_pinned(core);
        self.fail(Fault::ReadMsr)?;
        match msr {
            MSR_PATCH_LEVEL => Ok(self.revision),
            _ => Ok(0),
        }
    }

    fn write_msr(&mut self, core: CoreIndex, msr: u32, value: u64) -> Result<bool, TransportError> {
        self.calls.push(Call::WriteMsr(core, msr, value));
        self.require_pinned(core);
        self.fail(Fault::WriteMsr)?;
        if msr != MSR_PATCH_LOADER {
            return Ok(true);
        }
        let accepted = self.apply_results.pop_front().unwrap_or(false);
        if accepted {
            self.revision = self.loaded_revision;
        }
        Ok(accepted)
    }
}
