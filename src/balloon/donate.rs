use log::{debug, info};

use crate::{
    error::{BalloonError, Fault, Result},
    gateway::HostGateway,
    mem::{
        block_frames, get_order, tracking::PageLocation, FrameTranslation, PageAllocator,
        VirtualMapper,
    },
    platform::GuestPlatform,
    types::Pfn,
};

use super::{BalloonCore, WakeReason};

impl<G: GuestPlatform> BalloonCore<G> {
    /// Excises a `2^order` block covering `num_pages` pages and gives its
    /// frames to the host.
    pub(crate) fn donate_range(&self, num_pages: u64) -> Result<Pfn> {
        self.ensure_running()?;
        if num_pages == 0 {
            return Err(BalloonError::InvalidInput(
                "cannot donate an empty range".to_owned(),
            ));
        }
        let order = get_order(num_pages);
        let base = self.platform.allocator().alloc_pages(order).ok_or_else(|| {
            BalloonError::OutOfMemory(format!("no free block of order {order}"))
        })?;
        let result = self.excise(base, order);
        let result = self.check(result);
        if result.is_ok() {
            info!("donated {} pages at {base}", 1u64 << order);
            self.wake.send(WakeReason::Donation);
        }
        result.map(|()| base)
    }

    #[allow(clippy::arithmetic_side_effects, clippy::as_conversions)]
    fn excise(&self, base: Pfn, order: u32) -> Result<()> {
        let translation = self.platform.translation();
        let mapper = self.platform.mapper();
        let mut frames = Vec::with_capacity(1 << order);

        for pfn in block_frames(base, order) {
            self.state
                .lock()
                .tracker
                .transition(pfn, PageLocation::Allocator, PageLocation::Mapped)?;
            let mfn = translation
                .lookup(pfn)
                .ok_or(Fault::MissingTranslation { pfn })?;
            let page = self.boot.page(pfn);
            mapper.scrub(page);
            if page.is_direct() {
                mapper.unmap(pfn).map_err(|err| Fault::MappingFailed {
                    pfn,
                    reason: err.to_string(),
                })?;
            }
            frames.push(mfn);
        }
        mapper.flush_tlb();

        let mut state = self.state.lock();
        for pfn in block_frames(base, order) {
            translation.invalidate(pfn);
            state
                .tracker
                .transition(pfn, PageLocation::Mapped, PageLocation::Donated)?;
        }
        HostGateway::new(self.platform.hypervisor()).decrease_reservation(&frames)?;
        state.ledger.current_pages -= frames.len() as u64;
        Ok(())
    }

    /// Moves a donated block back into the pool.
    pub(crate) fn return_range(&self, base: Pfn, num_pages: u64) -> Result<()> {
        self.ensure_running()?;
        if num_pages == 0 {
            return Err(BalloonError::InvalidInput(
                "cannot return an empty range".to_owned(),
            ));
        }
        let order = get_order(num_pages);
        let result: Result<()> = {
            let mut state = self.state.lock();
            block_frames(base, order).try_for_each(|pfn| {
                state
                    .tracker
                    .transition(pfn, PageLocation::Donated, PageLocation::Pooled)?;
                let page = self.boot.page(pfn);
                state.pool.append(page);
                Ok(())
            })
        };
        self.check(result)?;
        debug!("returned {} pages at {base} to the pool", 1u64 << order);
        self.wake.send(WakeReason::Donation);
        Ok(())
    }
}
