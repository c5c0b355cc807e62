use std::collections::HashMap;

use parking_lot::Mutex;

use crate::{
    mem::FrameTranslation,
    types::{BootInfo, Mfn, Pfn},
};

use super::MFN_BASE;

#[derive(Debug)]
struct P2mState {
    p2m: Vec<Option<Mfn>>,
    m2p: HashMap<Mfn, Pfn>,
}

/// Physical-to-machine table of the emulated guest, with its reverse.
#[derive(Debug)]
pub struct EmulatedP2m {
    state: Mutex<P2mState>,
}

impl EmulatedP2m {
    #[allow(clippy::as_conversions, clippy::arithmetic_side_effects)]
    pub(crate) fn new(boot: &BootInfo) -> Self {
        let resident = boot.initial_pages();
        let p2m: Vec<_> = (0..boot.max_pfn)
            .map(|pfn| (pfn < resident).then(|| Mfn(MFN_BASE + pfn)))
            .collect();
        let m2p = (0..resident)
            .map(|pfn| (Mfn(MFN_BASE + pfn), Pfn(pfn)))
            .collect();
        Self {
            state: Mutex::new(P2mState { p2m, m2p }),
        }
    }

    /// Reverse translation of `mfn`.
    pub fn pfn_of(&self, mfn: Mfn) -> Option<Pfn> {
        self.state.lock().m2p.get(&mfn).copied()
    }

    /// Number of valid entries.
    pub fn valid_entries(&self) -> usize {
        self.state.lock().m2p.len()
    }
}

impl FrameTranslation for EmulatedP2m {
    fn lookup(&self, pfn: Pfn) -> Option<Mfn> {
        self.state.lock().p2m.get(pfn.index()).copied().flatten()
    }

    fn bind(&self, pfn: Pfn, mfn: Mfn) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(entry) = state.p2m.get_mut(pfn.index()) {
            *entry = Some(mfn);
            let _prev = state.m2p.insert(mfn, pfn);
        }
    }

    fn invalidate(&self, pfn: Pfn) {
        let mut state = self.state.lock();
        if let Some(mfn) = state.p2m.get_mut(pfn.index()).and_then(Option::take) {
            let _prev = state.m2p.remove(&mfn);
        }
    }
}
