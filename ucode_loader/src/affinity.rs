use crate::transport::{AffinityMask, DriverTransport};
use crate::TransportError;
use data_types::addresses::CoreIndex;
use log::{debug, error};

/// Keeps the calling thread pinned to one core until released or dropped.
///
/// The previous mask is restored exactly once. [`AffinityGuard::release`]
/// reports a failed restore; a guard that is dropped instead only logs it.
pub struct AffinityGuard<'a, T: DriverTransport + ?Sized> {
    transport: &'a mut T,
    core: CoreIndex,
    previous: Option<AffinityMask>,
}

impl<'a, T: DriverTransport + ?Sized> AffinityGuard<'a, T> {
    pub fn pin(transport: &'a mut T, core: CoreIndex) -> Result<Self, TransportError> {
        let previous = transport.set_affinity(core)?;
        debug!("pinned to core {} (previous mask {})", core, previous);
        Ok(AffinityGuard {
            transport,
            core,
            previous: Some(previous),
        })
    }

    pub fn core(&self) -> CoreIndex {
        self.core
    }

    pub fn transport(&mut self) -> &mut T {
        &mut *self.transport
    }

    pub fn release(mut self) -> Result<(), TransportError> {
        match self.previous.take() {
            Some(previous) => {
                self.transport.restore_affinity(previous)?;
                debug!("restored affinity mask {}", previous);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl<T: DriverTransport + ?Sized> Drop for AffinityGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            if let Err(err) = self.transport.restore_affinity(previous) {
                error!(
                    "failed to restore affinity after leaving core {}: {}",
                    self.core, err
                );
            }
        }
    }
}

/// Runs one privileged access with the thread pinned to `core`.
///
/// The affinity is restored whether or not `access` succeeds. If both fail,
/// the access error is returned and the restore error logged.
pub fn on_core<T, R, F>(transport: &mut T, core: CoreIndex, access: F) -> Result<R, TransportError>
where
    T: DriverTransport + ?Sized,
    F: FnOnce(&mut T) -> Result<R, TransportError>,
{
    let mut guard = AffinityGuard::pin(transport, core)?;
    let result = access(guard.transport());
    let restored = guard.release();

    match (result, restored) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(restore)) => {
            error!("affinity restore failed as well: {}", restore);
            Err(err)
        }
    }
}
