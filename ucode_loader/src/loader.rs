//! The patch loading state machine
//!
//! ```plain
//! Init -> PreRead -> Stage -> Apply -> PostRead -> Done
//!                      ^        |
//!                      +- Retry +  (rejected, retry allowed)
//! ```
//!
//! Every error ends in `Fatal`. Staged memory never outlives the Stage/Apply
//! cycle that allocated it.

use crate::affinity::on_core;
use crate::transport::{ContiguousAllocation, DriverTransport, MSR_PATCH_LEVEL, MSR_PATCH_LOADER};
use crate::{LoaderError, Result, TransportError, REMEDIATION};
use data_types::addresses::{Address, CoreIndex};
use log::{debug, error, info, trace, warn};
use std::io::{Read, Seek, SeekFrom};

/// What happens after the processor rejects a patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    #[default]
    Never,
    /// At most this many attempts in total
    Limited(u32),
    Forever,
}

impl RetryPolicy {
    fn allows_another(&self, attempts: u32) -> bool {
        match self {
            RetryPolicy::Never => false,
            RetryPolicy::Limited(max) => attempts < *max,
            RetryPolicy::Forever => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOptions {
    /// Target core as given by the operator, checked when the loader starts
    pub core: Option<i64>,
    pub retry: RetryPolicy,
}

impl LoadOptions {
    /// The core to load on, or why there is none
    pub fn target_core(&self) -> Result<CoreIndex> {
        let requested = self.core.ok_or_else(|| {
            LoaderError::Configuration("you need to specify a core number, e.g. --core 2".into())
        })?;
        CoreIndex::try_from(requested).map_err(|index| {
            LoaderError::Configuration(format!(
                "invalid core number {}, expected 0 to {}",
                index,
                CoreIndex::MAX
            ))
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum LoaderState {
    Init,
    PreRead,
    Stage,
    /// The patch bytes sit in `staged`, ready for the loader MSR
    Apply { staged: ContiguousAllocation },
    Retry,
    PostRead,
    Done,
    Fatal,
}

impl LoaderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoaderState::Done | LoaderState::Fatal)
    }

    fn name(&self) -> &'static str {
        match self {
            LoaderState::Init => "Init",
            LoaderState::PreRead => "PreRead",
            LoaderState::Stage => "Stage",
            LoaderState::Apply { .. } => "Apply",
            LoaderState::Retry => "Retry",
            LoaderState::PostRead => "PostRead",
            LoaderState::Done => "Done",
            LoaderState::Fatal => "Fatal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub core: CoreIndex,
    pub revision_before: u64,
    pub revision_after: u64,
    pub attempts: u32,
}

impl LoadReport {
    pub fn changed(&self) -> bool {
        self.revision_before != self.revision_after
    }
}

/// Reads the patch revision `core` is running
pub fn read_revision<T: DriverTransport + ?Sized>(
    transport: &mut T,
    core: CoreIndex,
) -> std::result::Result<u64, TransportError> {
    on_core(transport, core, |t| t.read_msr(core, MSR_PATCH_LEVEL))
}

/// Loads the bytes of `source` as a patch on one core.
///
/// The source is read from its start for every attempt.
pub struct PatchLoader<'t, T: DriverTransport + ?Sized, S> {
    transport: &'t mut T,
    source: S,
    options: LoadOptions,
    state: LoaderState,
    core: Option<CoreIndex>,
    patch_len: usize,
    attempts: u32,
    revision_before: Option<u64>,
    revision_after: Option<u64>,
}

impl<'t, T, S> PatchLoader<'t, T, S>
where
    T: DriverTransport + ?Sized,
    S: Read + Seek,
{
    pub fn new(transport: &'t mut T, source: S, options: LoadOptions) -> Self {
        PatchLoader {
            transport,
            source,
            options,
            state: LoaderState::Init,
            core: None,
            patch_len: 0,
            attempts: 0,
            revision_before: None,
            revision_after: None,
        }
    }

    pub fn state(&self) -> &LoaderState {
        &self.state
    }

    /// Stage/Apply cycles started so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The outcome, once the loader is done
    pub fn report(&self) -> Option<LoadReport> {
        match (&self.state, self.core, self.revision_before, self.revision_after) {
            (LoaderState::Done, Some(core), Some(revision_before), Some(revision_after)) => {
                Some(LoadReport {
                    core,
                    revision_before,
                    revision_after,
                    attempts: self.attempts,
                })
            }
            _ => None,
        }
    }

    /// Steps until the patch is loaded or loading failed
    pub fn run(mut self) -> Result<LoadReport> {
        while !self.state.is_terminal() {
            self.step()?;
        }
        self.report().ok_or(LoaderError::Terminated)
    }

    /// Performs one transition and returns the state it led to
    pub fn step(&mut self) -> Result<&LoaderState> {
        if self.state.is_terminal() {
            return Err(LoaderError::Terminated);
        }

        let current = std::mem::replace(&mut self.state, LoaderState::Fatal);
        let from = current.name();
        match self.advance(current) {
            Ok(next) => {
                trace!("{} -> {}", from, next.name());
                self.state = next;
                Ok(&self.state)
            }
            Err(err) => {
                trace!("{} -> Fatal", from);
                Err(err)
            }
        }
    }

    fn target(&self) -> Result<CoreIndex> {
        self.core
            .ok_or_else(|| LoaderError::Configuration("loader has no target core".into()))
    }

    fn advance(&mut self, state: LoaderState) -> Result<LoaderState> {
        match state {
            LoaderState::Init => {
                self.validate()?;
                Ok(LoaderState::PreRead)
            }
            LoaderState::PreRead => {
                let core = self.target()?;
                let revision = read_revision(self.transport, core)?;
                info!("old ucode patch on core {}: {:#x}", core, revision);
                self.revision_before = Some(revision);
                Ok(LoaderState::Stage)
            }
            LoaderState::Stage => {
                self.attempts += 1;
                let staged = self.stage()?;
                Ok(LoaderState::Apply { staged })
            }
            LoaderState::Apply { staged } => self.apply(staged),
            LoaderState::Retry => {
                debug!("retrying, attempt {}", self.attempts + 1);
                Ok(LoaderState::Stage)
            }
            LoaderState::PostRead => {
                let core = self.target()?;
                let revision = read_revision(self.transport, core)?;
                info!("new ucode patch on core {}: {:#x}", core, revision);
                self.revision_after = Some(revision);
                Ok(LoaderState::Done)
            }
            LoaderState::Done | LoaderState::Fatal => Err(LoaderError::Terminated),
        }
    }

    fn validate(&mut self) -> Result<()> {
        let core = self.options.target_core()?;

        let len = self.source.seek(SeekFrom::End(0))?;
        if len == 0 {
            return Err(LoaderError::Configuration("the update file is empty".into()));
        }
        let len = usize::try_from(len).map_err(|_| {
            LoaderError::Configuration(format!("update of {} bytes is too large", len))
        })?;

        debug!("loading {} bytes on core {}", len, core);
        self.core = Some(core);
        self.patch_len = len;
        Ok(())
    }

    /// Allocates driver memory and moves the patch bytes into it
    fn stage(&mut self) -> Result<ContiguousAllocation> {
        let staged = self.transport.allocate_contiguous(self.patch_len)?;
        debug!(
            "staging patch at {} (physical), {} (virtual)",
            staged.physical, staged.virtual_address
        );

        match self.fill(&staged) {
            Ok(()) => Ok(staged),
            Err(err) => {
                self.release_after_failure(staged);
                Err(err)
            }
        }
    }

    fn fill(&mut self, staged: &ContiguousAllocation) -> Result<()> {
        let mut local = vec![0u8; self.patch_len];
        self.source.seek(SeekFrom::Start(0))?;
        self.source.read_exact(&mut local)?;
        self.transport.write_physical(staged.physical, &local)?;
        Ok(())
    }

    fn apply(&mut self, staged: ContiguousAllocation) -> Result<LoaderState> {
        let core = match self.target() {
            Ok(core) => core,
            Err(err) => {
                self.release_after_failure(staged);
                return Err(err);
            }
        };

        let address = staged.virtual_address.address();
        let written = on_core(self.transport, core, |t| t.write_msr(core, MSR_PATCH_LOADER, address));
        let released = self.transport.release_contiguous(staged);

        let accepted = written?;
        released?;

        if accepted {
            debug!("core {} accepted the update on attempt {}", core, self.attempts);
            return Ok(LoaderState::PostRead);
        }

        if self.options.retry.allows_another(self.attempts) {
            warn!(
                "wrmsr failed, the cpu did not accept the update (attempt {})",
                self.attempts
            );
            return Ok(LoaderState::Retry);
        }

        error!("wrmsr failed, the cpu did not accept the update.\n{}", REMEDIATION);
        Err(LoaderError::ApplyRejected {
            attempts: self.attempts,
        })
    }

    fn release_after_failure(&mut self, staged: ContiguousAllocation) {
        if let Err(err) = self.transport.release_contiguous(staged) {
            error!("failed to release staged patch memory: {}", err);
        }
    }
}

impl<T: DriverTransport + ?Sized, S> Drop for PatchLoader<'_, T, S> {
    fn drop(&mut self) {
        if let LoaderState::Apply { staged } = std::mem::replace(&mut self.state, LoaderState::Fatal) {
            debug!("dropping loader with staged patch at {}", staged.physical);
            if let Err(err) = self.transport.release_contiguous(staged) {
                error!("failed to release staged patch memory: {}", err);
            }
        }
    }
}
