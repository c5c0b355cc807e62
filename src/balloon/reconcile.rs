use log::{debug, info, trace, warn};

use crate::{
    error::{Fault, Result},
    gateway::HostGateway,
    ledger::Step,
    mem::{tracking::PageLocation, FrameTranslation, PageAllocator, VirtualMapper},
    platform::GuestPlatform,
    types::{Mfn, Page},
};

use super::BalloonCore;

/// Ceiling rediscoveries allowed within one run before deferring to the
/// retry timer.
const MAX_LIMIT_DISCOVERIES: usize = 8;

/// Phase a reconciliation run ended in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No step was attempted.
    #[default]
    Idle,
    Growing,
    Shrinking,
    Converged,
}

/// Outcome of one reconciliation run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub state: WorkerState,
    /// Frames granted by the host and handed to the allocator.
    pub granted: u64,
    /// Frames surrendered to the host.
    pub returned: u64,
    /// Times the host refused part of a grant.
    pub limit_discoveries: usize,
    /// The staging buffer could not be allocated.
    pub aborted: bool,
    /// Another run is needed to reach the target.
    pub retry: bool,
}

enum GrowOutcome {
    Grown(u64),
    LimitHit,
    Aborted,
}

enum ShrinkOutcome {
    Shrunk(u64),
    Aborted,
}

impl<G: GuestPlatform> BalloonCore<G> {
    /// Reserves an empty batch for `count` entries, `None` on failure.
    fn reserve_batch<T>(&self, count: u64) -> Option<Vec<T>> {
        let count = usize::try_from(count).ok()?;
        let mut batch = Vec::new();
        self.platform
            .allocator()
            .reserve_batch(&mut batch, count)
            .then_some(batch)
    }

    /// Executes one reconciliation run.
    pub(crate) fn process(&self) -> Result<RunReport> {
        self.ensure_running()?;
        let _run = self.run_lock.lock();
        let result = self.reconcile();
        self.check(result)
    }

    #[allow(clippy::arithmetic_side_effects)]
    fn reconcile(&self) -> Result<RunReport> {
        let mut report = RunReport::default();
        loop {
            let step = {
                let state = self.state.lock();
                let pooled = state.pool.len();
                trace!("balloon credit: {}", state.ledger.credit(pooled));
                state.ledger.step(pooled)
            };
            match step {
                Step::Converged => break,
                Step::Grow(credit) => {
                    report.state = WorkerState::Growing;
                    match self.increase_reservation(credit)? {
                        GrowOutcome::Grown(granted) => report.granted += granted,
                        GrowOutcome::LimitHit => {
                            report.limit_discoveries += 1;
                            if report.limit_discoveries < MAX_LIMIT_DISCOVERIES {
                                continue;
                            }
                        }
                        GrowOutcome::Aborted => report.aborted = true,
                    }
                    break;
                }
                Step::Shrink(debt) => {
                    report.state = WorkerState::Shrinking;
                    match self.decrease_reservation(debt)? {
                        ShrinkOutcome::Shrunk(returned) => report.returned += returned,
                        ShrinkOutcome::Aborted => report.aborted = true,
                    }
                    break;
                }
            }
        }

        let converged = {
            let state = self.state.lock();
            state.ledger.is_converged(state.pool.len())
        };
        if converged {
            report.state = WorkerState::Converged;
        }
        report.retry = !converged;
        debug!("balloon run finished: {report:?}");
        Ok(report)
    }

    /// Populates `credit` pooled pages with fresh machine frames.
    #[allow(clippy::arithmetic_side_effects, clippy::as_conversions)]
    fn increase_reservation(&self, credit: u64) -> Result<GrowOutcome> {
        let Some(mut frames) = self.reserve_batch(credit) else {
            warn!("no memory for a {credit} frame grant batch, retrying later");
            return Ok(GrowOutcome::Aborted);
        };
        frames.resize(credit as usize, Mfn::default());
        let gateway = HostGateway::new(self.platform.hypervisor());

        let granted = {
            let _guard = self.state.lock();
            gateway.increase_reservation(&mut frames)? as u64
        };
        if granted < credit {
            // The host hit its ceiling: give back what it granted and retry under the new ceiling.
            let mut state = self.state.lock();
            if !frames.is_empty() {
                gateway.decrease_reservation(&frames)?;
            }
            let limit = state.ledger.discover_limit(granted);
            info!("host granted {granted} of {credit} frames, hard limit now {limit} pages");
            return Ok(GrowOutcome::LimitHit);
        }

        let translation = self.platform.translation();
        let mapper = self.platform.mapper();
        for (i, &mfn) in frames.iter().enumerate() {
            let page = {
                let mut state = self.state.lock();
                let page = state.pool.retrieve().ok_or(Fault::PoolExhausted {
                    expected: credit - i as u64,
                })?;
                state
                    .tracker
                    .transition(page.pfn, PageLocation::Pooled, PageLocation::Mapped)?;
                page
            };

            if let Some(existing) = translation.lookup(page.pfn) {
                return Err(Fault::TranslationInUse {
                    pfn: page.pfn,
                    mfn: existing,
                }
                .into());
            }
            translation.bind(page.pfn, mfn);
            if page.is_direct() {
                mapper.map(page.pfn, mfn).map_err(|err| Fault::MappingFailed {
                    pfn: page.pfn,
                    reason: err.to_string(),
                })?;
            }

            {
                // Counted before the allocator can hand the page to a donor.
                let mut state = self.state.lock();
                state
                    .tracker
                    .transition(page.pfn, PageLocation::Mapped, PageLocation::Allocator)?;
                state.ledger.current_pages += 1;
            }
            self.platform.allocator().free_page(page.pfn);
        }

        Ok(GrowOutcome::Grown(granted))
    }

    /// Surrenders up to `debt` pages taken from the allocator.
    #[allow(clippy::arithmetic_side_effects, clippy::as_conversions)]
    fn decrease_reservation(&self, debt: u64) -> Result<ShrinkOutcome> {
        let (Some(mut frames), Some(mut pages)) =
            (self.reserve_batch::<Mfn>(debt), self.reserve_batch::<Page>(debt))
        else {
            warn!("no memory for a {debt} page return batch, retrying later");
            return Ok(ShrinkOutcome::Aborted);
        };

        let translation = self.platform.translation();
        let mapper = self.platform.mapper();
        for _ in 0..debt {
            let Some(pfn) = self.platform.allocator().alloc_page() else {
                warn!("allocator supplied {} of {debt} pages", pages.len());
                break;
            };
            let page = self.boot.page(pfn);
            self.state
                .lock()
                .tracker
                .transition(pfn, PageLocation::Allocator, PageLocation::Mapped)?;
            let mfn = translation
                .lookup(pfn)
                .ok_or(Fault::MissingTranslation { pfn })?;
            frames.push(mfn);

            if page.is_direct() {
                mapper.scrub(page);
                mapper.unmap(pfn).map_err(|err| Fault::MappingFailed {
                    pfn,
                    reason: err.to_string(),
                })?;
            } else if self.config.scrub_non_direct {
                mapper.scrub(page);
            }
            pages.push(page);
        }
        if pages.is_empty() {
            return Ok(ShrinkOutcome::Shrunk(0));
        }

        // No mapping may outlive the frames handed back below.
        mapper.flush_tlb();

        for &page in &pages {
            translation.invalidate(page.pfn);
            let mut state = self.state.lock();
            state
                .tracker
                .transition(page.pfn, PageLocation::Mapped, PageLocation::Pooled)?;
            state.pool.append(page);
            state.ledger.current_pages -= 1;
        }

        let _guard = self.state.lock();
        HostGateway::new(self.platform.hypervisor()).decrease_reservation(&frames)?;
        let returned = frames.len() as u64;
        Ok(ShrinkOutcome::Shrunk(returned))
    }
}
