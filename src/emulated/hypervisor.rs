use std::collections::HashSet;

use parking_lot::Mutex;

use crate::{
    gateway::ReservationHypervisor,
    types::{BootInfo, Mfn},
};

use super::MFN_BASE;

/// A reservation hypercall as the emulated host saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCall {
    Increase { requested: usize, granted: usize },
    Decrease { requested: usize, returned: usize },
}

#[derive(Debug)]
struct HostState {
    /// Frames currently backing the guest.
    owned: HashSet<Mfn>,
    next_mfn: u64,
    max_reservation: Option<u64>,
    refuse_returns: bool,
    calls: Vec<HostCall>,
}

/// Host side of the emulated guest's reservation.
#[derive(Debug)]
pub struct EmulatedHypervisor {
    state: Mutex<HostState>,
}

impl EmulatedHypervisor {
    #[allow(clippy::arithmetic_side_effects)]
    pub(crate) fn new(boot: &BootInfo) -> Self {
        let owned = (0..boot.initial_pages())
            .map(|pfn| Mfn(MFN_BASE + pfn))
            .collect();
        Self {
            state: Mutex::new(HostState {
                owned,
                next_mfn: MFN_BASE + boot.max_pfn,
                max_reservation: None,
                refuse_returns: false,
                calls: Vec::new(),
            }),
        }
    }

    /// Caps the reservation the host is willing to back, `None` for no cap.
    pub fn set_max_reservation(&self, max: Option<u64>) {
        self.state.lock().max_reservation = max;
    }

    /// Makes the host keep every frame offered back.
    pub fn refuse_returns(&self, refuse: bool) {
        self.state.lock().refuse_returns = refuse;
    }

    /// Number of frames currently backing the guest.
    #[allow(clippy::as_conversions)]
    pub fn reservation(&self) -> u64 {
        self.state.lock().owned.len() as u64
    }

    pub fn owns(&self, mfn: Mfn) -> bool {
        self.state.lock().owned.contains(&mfn)
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<HostCall> {
        self.state.lock().calls.clone()
    }
}

impl ReservationHypervisor for EmulatedHypervisor {
    #[allow(clippy::as_conversions, clippy::arithmetic_side_effects)]
    fn increase_reservation(&self, frames: &mut [Mfn]) -> usize {
        let mut state = self.state.lock();
        let headroom = state.max_reservation.map_or(usize::MAX, |max| {
            max.saturating_sub(state.owned.len() as u64) as usize
        });
        let granted = frames.len().min(headroom);
        for frame in &mut frames[..granted] {
            *frame = Mfn(state.next_mfn);
            state.next_mfn += 1;
            let _new = state.owned.insert(*frame);
        }
        state.calls.push(HostCall::Increase {
            requested: frames.len(),
            granted,
        });
        granted
    }

    fn decrease_reservation(&self, frames: &[Mfn]) -> usize {
        let mut state = self.state.lock();
        let returned = if state.refuse_returns {
            0
        } else {
            frames
                .iter()
                .filter(|&&mfn| state.owned.remove(&mfn))
                .count()
        };
        state.calls.push(HostCall::Decrease {
            requested: frames.len(),
            returned,
        });
        returned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_stop_at_the_cap() {
        let host = EmulatedHypervisor::new(&BootInfo::new(10, 20, 20));
        host.set_max_reservation(Some(12));
        let mut frames = vec![Mfn::default(); 5];
        assert_eq!(host.increase_reservation(&mut frames), 2);
        assert_eq!(frames[..2], [Mfn(MFN_BASE + 20), Mfn(MFN_BASE + 21)]);
        assert_eq!(host.reservation(), 12);
    }

    #[test]
    fn only_owned_frames_are_taken_back() {
        let host = EmulatedHypervisor::new(&BootInfo::new(10, 20, 20));
        let returned = host.decrease_reservation(&[Mfn(MFN_BASE), Mfn(1)]);
        assert_eq!(returned, 1);
        assert!(!host.owns(Mfn(MFN_BASE)));
        assert_eq!(
            host.calls(),
            vec![HostCall::Decrease {
                requested: 2,
                returned: 1
            }]
        );
    }
}
