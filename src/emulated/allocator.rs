use std::sync::atomic::{AtomicBool, Ordering};

use buddy_system_allocator::FrameAllocator;
use parking_lot::Mutex;

use crate::{
    mem::PageAllocator,
    types::{BootInfo, Pfn},
};

const ORDER: usize = 32;

/// Buddy allocator over the guest's frames.
///
/// Only frames resident at boot start out free; pooled frames enter the
/// allocator when the balloon hands them over.
pub struct EmulatedAllocator {
    frames: Mutex<FrameAllocator<ORDER>>,
    refuse_batches: AtomicBool,
}

impl EmulatedAllocator {
    #[allow(clippy::as_conversions)]
    pub(crate) fn new(boot: &BootInfo) -> Self {
        let mut frames = FrameAllocator::new();
        let max_pfn = boot.max_pfn as usize;
        frames.add_frame(0, max_pfn);
        // Claim everything first so the allocator's accounting covers
        // the frames released below.
        for _ in 0..max_pfn {
            let _frame = frames.alloc(1);
        }
        for pfn in 0..boot.initial_pages() as usize {
            frames.dealloc(pfn, 1);
        }
        Self {
            frames: Mutex::new(frames),
            refuse_batches: AtomicBool::new(false),
        }
    }

    /// Takes up to `count` pages out of circulation, simulating memory
    /// pressure from other guest users.
    pub fn hold_pages(&self, count: usize) -> Vec<Pfn> {
        std::iter::from_fn(|| self.alloc_page()).take(count).collect()
    }

    /// Makes every later batch reservation fail.
    pub fn refuse_batches(&self, refuse: bool) {
        self.refuse_batches.store(refuse, Ordering::Relaxed);
    }

    /// Gives pages taken by [`EmulatedAllocator::hold_pages`] back.
    pub fn release_pages(&self, pages: Vec<Pfn>) {
        for pfn in pages {
            self.free_page(pfn);
        }
    }
}

impl std::fmt::Debug for EmulatedAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedAllocator").finish_non_exhaustive()
    }
}

impl PageAllocator for EmulatedAllocator {
    #[allow(clippy::as_conversions)]
    fn alloc_page(&self) -> Option<Pfn> {
        self.frames.lock().alloc(1).map(|frame| Pfn(frame as u64))
    }

    fn free_page(&self, pfn: Pfn) {
        self.frames.lock().dealloc(pfn.index(), 1);
    }

    #[allow(clippy::as_conversions)]
    fn alloc_pages(&self, order: u32) -> Option<Pfn> {
        self.frames
            .lock()
            .alloc(1 << order)
            .map(|frame| Pfn(frame as u64))
    }

    fn reserve_batch<T>(&self, batch: &mut Vec<T>, count: usize) -> bool {
        !self.refuse_batches.load(Ordering::Relaxed) && batch.try_reserve_exact(count).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_aligned_to_their_size() {
        let allocator = EmulatedAllocator::new(&BootInfo::new(64, 128, 128));
        let _single = allocator.alloc_page().unwrap();
        let block = allocator.alloc_pages(3).unwrap();
        assert_eq!(block.0 % 8, 0);
        assert!(block.0 + 8 <= 64);
    }

    #[test]
    fn pooled_frames_are_not_free_at_boot() {
        let allocator = EmulatedAllocator::new(&BootInfo::new(4, 16, 16));
        let held = allocator.hold_pages(16);
        assert_eq!(held.len(), 4);
        allocator.free_page(Pfn(12));
        assert_eq!(allocator.alloc_page(), Some(Pfn(12)));
        allocator.release_pages(held);
        assert_eq!(allocator.hold_pages(16).len(), 4);
    }
}
