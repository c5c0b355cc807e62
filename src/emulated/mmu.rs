use std::{
    io,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use bitvec::vec::BitVec;
use parking_lot::Mutex;

use crate::{
    mem::VirtualMapper,
    types::{BootInfo, Mfn, Page, Pfn},
};

#[derive(Debug)]
struct MmuState {
    /// Linear mapping present.
    mapped: BitVec,
    /// Contents zeroed since the frame was last mapped.
    scrubbed: BitVec,
}

/// Linear mapping of the emulated guest.
#[derive(Debug)]
pub struct EmulatedMmu {
    state: Mutex<MmuState>,
    tlb_flushes: AtomicUsize,
    refuse_updates: AtomicBool,
}

impl EmulatedMmu {
    #[allow(clippy::as_conversions)]
    pub(crate) fn new(boot: &BootInfo) -> Self {
        let max_pfn = boot.max_pfn as usize;
        let mapped_end = boot.initial_pages().min(boot.max_low_pfn) as usize;
        let mut mapped = BitVec::with_capacity(max_pfn);
        mapped.resize(max_pfn, false);
        mapped[..mapped_end].fill(true);
        let mut scrubbed = BitVec::with_capacity(max_pfn);
        scrubbed.resize(max_pfn, false);

        Self {
            state: Mutex::new(MmuState { mapped, scrubbed }),
            tlb_flushes: AtomicUsize::new(0),
            refuse_updates: AtomicBool::new(false),
        }
    }

    pub fn is_mapped(&self, pfn: Pfn) -> bool {
        self.state
            .lock()
            .mapped
            .get(pfn.index())
            .is_some_and(|bit| *bit)
    }

    pub fn is_scrubbed(&self, pfn: Pfn) -> bool {
        self.state
            .lock()
            .scrubbed
            .get(pfn.index())
            .is_some_and(|bit| *bit)
    }

    pub fn tlb_flushes(&self) -> usize {
        self.tlb_flushes.load(Ordering::Relaxed)
    }

    /// Makes every later mapping update fail.
    pub fn refuse_updates(&self, refuse: bool) {
        self.refuse_updates.store(refuse, Ordering::Relaxed);
    }

    fn update(&self, pfn: Pfn, map: bool) -> io::Result<()> {
        if self.refuse_updates.load(Ordering::Relaxed) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "mapping update refused",
            ));
        }
        let mut state = self.state.lock();
        let Some(mut bit) = state.mapped.get_mut(pfn.index()) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{pfn} out of range"),
            ));
        };
        if *bit == map {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{pfn} mapping already in requested state"),
            ));
        }
        *bit = map;
        drop(bit);
        if map {
            state.scrubbed.set(pfn.index(), false);
        }
        Ok(())
    }
}

impl VirtualMapper for EmulatedMmu {
    fn map(&self, pfn: Pfn, _mfn: Mfn) -> io::Result<()> {
        self.update(pfn, true)
    }

    fn unmap(&self, pfn: Pfn) -> io::Result<()> {
        self.update(pfn, false)
    }

    fn scrub(&self, page: Page) {
        let mut state = self.state.lock();
        if page.pfn.index() < state.scrubbed.len() {
            state.scrubbed.set(page.pfn.index(), true);
        }
    }

    fn flush_tlb(&self) {
        let _prev = self.tlb_flushes.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_twice_is_refused() {
        let mmu = EmulatedMmu::new(&BootInfo::new(4, 8, 8));
        assert!(mmu.map(Pfn(2), Mfn(1)).is_err());
        mmu.unmap(Pfn(2)).unwrap();
        assert!(mmu.unmap(Pfn(2)).is_err());
        mmu.map(Pfn(2), Mfn(1)).unwrap();
        assert!(mmu.is_mapped(Pfn(2)));
    }

    #[test]
    fn remapping_clears_the_scrub_mark() {
        let mmu = EmulatedMmu::new(&BootInfo::new(4, 8, 8));
        let page = Page::new(Pfn(1), crate::types::MemoryClass::Direct);
        mmu.scrub(page);
        mmu.unmap(Pfn(1)).unwrap();
        assert!(mmu.is_scrubbed(Pfn(1)));
        mmu.map(Pfn(1), Mfn(9)).unwrap();
        assert!(!mmu.is_scrubbed(Pfn(1)));
    }
}
