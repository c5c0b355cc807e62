use log::trace;

use crate::{error::Fault, types::Mfn};

/// Reservation hypercalls of the host.
pub trait ReservationHypervisor: Send + Sync {
    /// Asks the host for up to `frames.len()` new machine frames.
    ///
    /// The host fills the head of `frames` and returns how many it granted.
    fn increase_reservation(&self, frames: &mut [Mfn]) -> usize;

    /// Gives the listed frames back to the host.
    ///
    /// Returns how many frames the host took back.
    fn decrease_reservation(&self, frames: &[Mfn]) -> usize;
}

/// Batched grant and return of machine frames.
///
/// Does not retry; the reconciliation worker owns the recovery policy.
#[derive(Debug)]
pub(crate) struct HostGateway<'a, H> {
    host: &'a H,
}

impl<'a, H: ReservationHypervisor> HostGateway<'a, H> {
    pub(crate) fn new(host: &'a H) -> Self {
        Self { host }
    }

    /// Requests `frames.len()` frames and truncates `frames` to the grant.
    ///
    /// # Errors
    ///
    /// Returns a fault for an empty request or if the host grants more than asked.
    pub(crate) fn increase_reservation(&self, frames: &mut Vec<Mfn>) -> Result<usize, Fault> {
        let requested = frames.len();
        if requested == 0 {
            return Err(Fault::EmptyBatch);
        }
        let granted = self.host.increase_reservation(frames);
        trace!("increase reservation, requested: {requested}, granted: {granted}");
        if granted > requested {
            return Err(Fault::OverGrant { requested, granted });
        }
        frames.truncate(granted);
        Ok(granted)
    }

    /// Surrenders exactly `frames`.
    ///
    /// # Errors
    ///
    /// Returns a fault for an empty batch or if the host takes back fewer frames.
    pub(crate) fn decrease_reservation(&self, frames: &[Mfn]) -> Result<(), Fault> {
        if frames.is_empty() {
            return Err(Fault::EmptyBatch);
        }
        let returned = self.host.decrease_reservation(frames);
        trace!(
            "decrease reservation, requested: {}, returned: {returned}",
            frames.len()
        );
        if returned != frames.len() {
            return Err(Fault::ShortDecrease {
                requested: frames.len(),
                returned,
            });
        }
        Ok(())
    }
}
