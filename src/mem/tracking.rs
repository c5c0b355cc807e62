use crate::{
    error::Fault,
    types::{BootInfo, Pfn},
};

/// Where a guest page currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageLocation {
    /// Owned by the general allocator and backed by a machine frame.
    Allocator,
    /// Backed by a machine frame and held by the balloon in transit.
    Mapped,
    /// Surrendered and waiting in the balloon pool.
    Pooled,
    /// Excised by a driver through range donation.
    Donated,
}

impl PageLocation {
    const COUNT: usize = 4;

    #[allow(clippy::as_conversions)]
    fn slot(self) -> usize {
        self as usize
    }
}

/// Location record of every frame below `max_pfn`.
#[derive(Debug)]
pub(crate) struct PageTracker {
    locations: Vec<PageLocation>,
    counts: [u64; PageLocation::COUNT],
}

impl PageTracker {
    pub(crate) fn new(boot: &BootInfo) -> Self {
        let resident = boot.initial_pages();
        let locations: Vec<_> = (0..boot.max_pfn)
            .map(|pfn| {
                if pfn < resident {
                    PageLocation::Allocator
                } else {
                    PageLocation::Pooled
                }
            })
            .collect();
        let mut counts = [0; PageLocation::COUNT];
        counts[PageLocation::Allocator.slot()] = resident;
        counts[PageLocation::Pooled.slot()] = boot.max_pfn.saturating_sub(resident);

        Self { locations, counts }
    }

    #[cfg(test)]
    pub(crate) fn location(&self, pfn: Pfn) -> Option<PageLocation> {
        self.locations.get(pfn.index()).copied()
    }

    /// Moves `pfn` from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns `Fault::IllegalTransition` if the page is not in `from`.
    #[allow(clippy::arithmetic_side_effects)] // counts mirror the table
    pub(crate) fn transition(
        &mut self,
        pfn: Pfn,
        from: PageLocation,
        to: PageLocation,
    ) -> Result<(), Fault> {
        let Some(location) = self.locations.get_mut(pfn.index()) else {
            return Err(Fault::IllegalTransition {
                pfn,
                from: None,
                to,
            });
        };
        if *location != from {
            return Err(Fault::IllegalTransition {
                pfn,
                from: Some(*location),
                to,
            });
        }
        *location = to;
        self.counts[from.slot()] -= 1;
        self.counts[to.slot()] += 1;
        Ok(())
    }

    pub(crate) fn count(&self, location: PageLocation) -> u64 {
        self.counts[location.slot()]
    }

    /// Pages backed by a machine frame.
    #[allow(clippy::arithmetic_side_effects)]
    pub(crate) fn resident(&self) -> u64 {
        self.count(PageLocation::Allocator) + self.count(PageLocation::Mapped)
    }
}
