//! Applies microcode patches to a single core through a privileged driver.
//!
//! The driver is reached through [`DriverTransport`]; every per-core register
//! access is pinned to that core with [`on_core`]. [`PatchLoader`] is the
//! state machine that stages the patch bytes and triggers the load.

use data_types::addresses::CoreIndex;
use std::io;
use thiserror::Error;

pub mod affinity;
pub mod loader;
pub mod transport;
#[cfg(windows)]
pub mod asr_driver;

#[cfg(test)]
mod recording;

pub use affinity::{on_core, AffinityGuard};
pub use loader::{read_revision, LoadOptions, LoadReport, LoaderState, PatchLoader, RetryPolicy};
pub use transport::{
    AffinityMask, ContiguousAllocation, DriverTransport, MSR_PATCH_LEVEL, MSR_PATCH_LOADER,
};

/// Steps an operator can take when the processor refuses a patch
pub const REMEDIATION: &str = "\
    - check the signature of the update\n\
    - check that the cpuid matches the match table\n\
    - is the update revision >= the current revision? read MSR 0x8b\n\
    - this could be transient, try again (or use --retry)";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {device}: {source}")]
    Open {
        device: &'static str,
        source: io::Error,
    },

    #[error("ioctl {code:#x} failed: {source}")]
    Ioctl { code: u32, source: io::Error },

    #[error("failed to allocate {len} contiguous bytes: {reason}")]
    Allocation { len: usize, reason: String },

    #[error("failed to pin to core {core}: {source}")]
    SetAffinity { core: CoreIndex, source: io::Error },

    #[error("failed to restore affinity mask {mask}: {source}")]
    RestoreAffinity { mask: AffinityMask, source: io::Error },

    #[error("driver access is not supported on this platform")]
    Unsupported,
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to read patch source: {0}")]
    Source(#[from] io::Error),

    #[error("the cpu did not accept the update after {attempts} attempt(s)\n{}", REMEDIATION)]
    ApplyRejected { attempts: u32 },

    #[error("the loader has already finished")]
    Terminated,
}

pub type Result<T> = std::result::Result<T, LoaderError>;

/// Opens the platform's driver transport
#[cfg(windows)]
pub fn open_driver() -> std::result::Result<Box<dyn DriverTransport>, TransportError> {
    Ok(Box::new(asr_driver::AsrDriver::open()?))
}

/// Opens the platform's driver transport
#[cfg(not(windows))]
pub fn open_driver() -> std::result::Result<Box<dyn DriverTransport>, TransportError> {
    Err(TransportError::Unsupported)
}
