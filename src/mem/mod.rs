use std::io;

use crate::types::{Mfn, Page, Pfn};

/// Per-page location records
pub(crate) mod tracking;

/// The general-purpose page allocator of the guest.
pub trait PageAllocator: Send + Sync {
    /// Takes a single page from the allocator.
    ///
    /// Returns `None` when no page is available.
    fn alloc_page(&self) -> Option<Pfn>;

    /// Hands a page over to the allocator.
    fn free_page(&self, pfn: Pfn);

    /// Allocates `2^order` physically contiguous pages aligned to their size.
    ///
    /// # Returns
    ///
    /// The first frame of the block, or `None` if no such block is free.
    fn alloc_pages(&self, order: u32) -> Option<Pfn>;

    /// Reserves room for `count` entries in a per-run batch.
    ///
    /// Returns `false` if the memory cannot be found; the caller aborts the
    /// run and retries later.
    fn reserve_batch<T>(&self, batch: &mut Vec<T>, count: usize) -> bool {
        batch.try_reserve_exact(count).is_ok()
    }
}

/// The guest's virtual mapping subsystem.
pub trait VirtualMapper: Send + Sync {
    /// Installs the linear mapping of a directly addressable page.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping update is refused.
    fn map(&self, pfn: Pfn, mfn: Mfn) -> io::Result<()>;

    /// Removes the linear mapping of a directly addressable page.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping update is refused.
    fn unmap(&self, pfn: Pfn) -> io::Result<()>;

    /// Zeroes the contents of a page, mapping it transiently if needed.
    fn scrub(&self, page: Page);

    /// Drops stale transient mappings and flushes every TLB.
    fn flush_tlb(&self);
}

/// The physical-to-machine frame translation table.
pub trait FrameTranslation: Send + Sync {
    /// Returns the machine frame backing `pfn`, `None` if the entry is invalid.
    fn lookup(&self, pfn: Pfn) -> Option<Mfn>;

    /// Points `pfn` at `mfn` and records the reverse translation.
    fn bind(&self, pfn: Pfn, mfn: Mfn);

    /// Marks the entry of `pfn` invalid.
    fn invalidate(&self, pfn: Pfn);
}

/// Returns the smallest order whose block holds `num_pages` pages.
#[allow(clippy::arithmetic_side_effects)]
pub(crate) fn get_order(num_pages: u64) -> u32 {
    num_pages.max(1).next_power_of_two().trailing_zeros()
}

/// Returns an iterator over the frames of a `2^order` block.
pub(crate) fn block_frames(base: Pfn, order: u32) -> impl Iterator<Item = Pfn> {
    (0..1u64 << order).map(move |i| base.add(i))
}
