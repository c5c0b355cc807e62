//! The balloon controller: reservation ledger, page pool and the
//! operations that move pages between the guest and the host.
//!
//! Two locks order all state changes:
//!
//! * the balloon lock (`BalloonCore::state`) guards the ledger, the pool and
//!   the page tracker. It is only held for a single ledger update, a single
//!   host call with its ledger update, or a single page transition.
//! * the run lock (`BalloonCore::run_lock`) serializes reconciliation runs,
//!   so at most one run is active at any time.
//!
//! `current_pages` moves one page at a time, in the same critical section as
//! the page's transition into or out of the allocator side, so a concurrent
//! donation or status read never sees a page counted twice or not at all
//! past its hand-off.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use log::{error, info};
use parking_lot::Mutex;

use crate::{
    config::BalloonConfig,
    control::{watch, BalloonControl, TargetControl, XenStore},
    error::{BalloonError, Result},
    ledger::{HardLimit, Ledger},
    mem::tracking::PageTracker,
    platform::GuestPlatform,
    pool::BalloonPool,
    types::{BootInfo, Pfn},
    workers::{
        balloon::BalloonWorker,
        spawner::{task_channel, AbortSignal, SingleThreadTaskWorker, TaskTx},
    },
};

/// Range donation API
mod donate;

/// Reconciliation runs
mod reconcile;

pub use reconcile::{RunReport, WorkerState};

/// Why the reconciliation worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeReason {
    TargetChanged,
    Donation,
    RetryTimer,
}

/// State guarded by the balloon lock.
#[derive(Debug)]
pub(crate) struct BalloonState {
    pub(crate) ledger: Ledger,
    pub(crate) pool: BalloonPool,
    pub(crate) tracker: PageTracker,
}

impl BalloonState {
    fn stats(&self) -> BalloonStats {
        BalloonStats {
            current_pages: self.ledger.current_pages,
            target_pages: self.ledger.target_pages,
            pool_low: self.pool.low(),
            pool_high: self.pool.high(),
            hard_limit: self.ledger.hard_limit,
            driver_pages: self.ledger.driver_pages,
        }
    }
}

/// Snapshot of the reservation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalloonStats {
    /// Pages backed by the host.
    pub current_pages: u64,
    /// Pages requested by policy.
    pub target_pages: u64,
    /// Pooled directly addressable pages.
    pub pool_low: u64,
    /// Pooled non-direct pages.
    pub pool_high: u64,
    pub hard_limit: HardLimit,
    /// Headroom claimed by other drivers.
    pub driver_pages: i64,
}

impl BalloonStats {
    #[allow(clippy::arithmetic_side_effects)]
    pub fn pooled(&self) -> u64 {
        self.pool_low + self.pool_high
    }

    /// The reservation the balloon is currently converging to.
    pub fn current_target(&self) -> u64 {
        Ledger {
            current_pages: self.current_pages,
            target_pages: self.target_pages,
            hard_limit: self.hard_limit,
            driver_pages: self.driver_pages,
        }
        .current_target(self.pooled())
    }

    pub fn is_converged(&self) -> bool {
        self.current_target() == self.current_pages
    }
}

/// State shared between the controller handle and its worker.
pub(crate) struct BalloonCore<G> {
    platform: G,
    boot: BootInfo,
    config: BalloonConfig,
    state: Mutex<BalloonState>,
    run_lock: Mutex<()>,
    wake: TaskTx<WakeReason>,
    halted: AtomicBool,
}

impl<G: GuestPlatform> BalloonCore<G> {
    /// Builds the ledger from the boot layout and pools every frame above
    /// the initial reservation.
    pub(crate) fn new(platform: G, config: BalloonConfig, wake: TaskTx<WakeReason>) -> Self {
        let boot = platform.boot_info();
        let current = boot.initial_pages();
        let mut pool = BalloonPool::new();
        for pfn in current..boot.max_pfn {
            pool.append(boot.page(Pfn(pfn)));
        }
        info!(
            "initialising balloon, current: {current} pages, ballooned: {} low / {} high",
            pool.low(),
            pool.high()
        );

        Self {
            platform,
            boot,
            config,
            state: Mutex::new(BalloonState {
                ledger: Ledger::new(current),
                pool,
                tracker: PageTracker::new(&boot),
            }),
            run_lock: Mutex::new(()),
            wake,
            halted: AtomicBool::new(false),
        }
    }

    pub(crate) fn stats(&self) -> BalloonStats {
        self.state.lock().stats()
    }

    pub(crate) fn config(&self) -> &BalloonConfig {
        &self.config
    }

    /// Stores a new target, forgets the host ceiling and wakes the worker.
    pub(crate) fn set_new_target(&self, target_pages: u64) {
        self.state.lock().ledger.set_target(target_pages);
        info!("new balloon target: {target_pages} pages");
        self.wake.send(WakeReason::TargetChanged);
    }

    /// Adds `delta` pages to the headroom held by other drivers.
    pub(crate) fn adjust_driver_headroom(&self, delta: i64) {
        self.state.lock().ledger.adjust_driver_pages(delta);
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_halted() {
            return Err(BalloonError::Halted);
        }
        Ok(())
    }

    /// Halts the balloon if `result` carries a fatal fault.
    ///
    /// Must not be called with the balloon lock held.
    fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(ref err) = result {
            if err.is_fatal() {
                self.halt(err);
            }
        }
        result
    }

    fn halt(&self, err: &BalloonError) {
        let stats = self.stats();
        error!("balloon halted: {err}, state: {stats:?}");
        self.halted.store(true, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn platform(&self) -> &G {
        &self.platform
    }

    #[cfg(test)]
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&BalloonState) -> R) -> R {
        f(&self.state.lock())
    }
}

impl<G: GuestPlatform> TargetControl for BalloonCore<G> {
    fn set_new_target(&self, target_pages: u64) {
        BalloonCore::set_new_target(self, target_pages);
    }

    fn stats(&self) -> BalloonStats {
        BalloonCore::stats(self)
    }
}

/// Handle to a running balloon driver.
///
/// Dropping the handle stops the reconciliation worker.
pub struct Balloon<G: GuestPlatform> {
    core: Arc<BalloonCore<G>>,
    abort: AbortSignal,
}

impl<G: GuestPlatform> Balloon<G> {
    /// Initialises the balloon and spawns its reconciliation worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn init(platform: G, config: BalloonConfig) -> Result<Self> {
        let (wake_tx, wake_rx) = task_channel();
        let name = config.worker_name.clone();
        let core = Arc::new(BalloonCore::new(platform, config, wake_tx));
        let abort = AbortSignal::new();
        let _handle = BalloonWorker::new(Arc::clone(&core)).spawn(wake_rx, &name, abort.clone())?;

        Ok(Self { core, abort })
    }

    /// Initialises the balloon and registers the target watch on `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn init_with_store<S: XenStore + ?Sized>(
        platform: G,
        config: BalloonConfig,
        store: &S,
    ) -> Result<Self> {
        let balloon = Self::init(platform, config)?;
        balloon.register_watch(store);
        Ok(balloon)
    }

    /// Initialises the balloon without a worker.
    ///
    /// The caller drives reconciliation through [`Balloon::process`].
    pub fn init_without_worker(platform: G, config: BalloonConfig) -> Self {
        let (wake_tx, _wake_rx) = task_channel();
        Self {
            core: Arc::new(BalloonCore::new(platform, config, wake_tx)),
            abort: AbortSignal::new(),
        }
    }

    /// Watches the configured target key of `store`.
    ///
    /// A registration failure is logged; the balloon keeps working through
    /// the control surface.
    pub fn register_watch<S: XenStore + ?Sized>(&self, store: &S) {
        let target: Arc<dyn TargetControl> = Arc::clone(&self.core) as Arc<dyn TargetControl>;
        if let Err(err) = watch::register_target_watch(store, self.core.config(), target) {
            error!("failed to set balloon watcher: {err}");
        }
    }

    /// Runs one reconciliation step on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns `BalloonError::Fatal` if accounting is found corrupted, and
    /// `BalloonError::Halted` on every call after that.
    pub fn process(&self) -> Result<RunReport> {
        self.core.process()
    }

    /// Requests a new reservation of `target_pages` pages.
    pub fn set_target(&self, target_pages: u64) {
        self.core.set_new_target(target_pages);
    }

    pub fn stats(&self) -> BalloonStats {
        self.core.stats()
    }

    /// Excises a block of at least `num_pages` contiguous pages and returns
    /// its frames to the host.
    ///
    /// # Errors
    ///
    /// Returns `BalloonError::OutOfMemory` if no such block is free.
    pub fn donate_range(&self, num_pages: u64) -> Result<Pfn> {
        self.core.donate_range(num_pages)
    }

    /// Gives a donated block back to the balloon pool.
    ///
    /// # Errors
    ///
    /// Returns a fatal error if the block was not donated.
    pub fn return_range(&self, base: Pfn, num_pages: u64) -> Result<()> {
        self.core.return_range(base, num_pages)
    }

    /// Adds `delta` pages to the headroom held by other drivers.
    pub fn adjust_driver_headroom(&self, delta: i64) {
        self.core.adjust_driver_headroom(delta);
    }

    /// Returns the text control surface of this balloon.
    pub fn control(&self) -> BalloonControl {
        BalloonControl::new(Arc::clone(&self.core) as Arc<dyn TargetControl>)
    }

    pub fn is_halted(&self) -> bool {
        self.core.is_halted()
    }

    pub fn platform(&self) -> &G {
        &self.core.platform
    }

    /// Blocks until the reservation matches the current target.
    ///
    /// Returns `false` on timeout or if the balloon halted.
    pub fn wait_converged(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.stats().is_converged() {
                return true;
            }
            if self.is_halted() || start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl<G: GuestPlatform> Drop for Balloon<G> {
    fn drop(&mut self) {
        self.abort.abort();
    }
}
