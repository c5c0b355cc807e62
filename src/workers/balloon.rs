use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, error, trace};

use crate::{
    balloon::{BalloonCore, WakeReason, WorkerState},
    platform::GuestPlatform,
    workers::spawner::SingleThreadTaskWorker,
};

/// Background worker running reconciliation on wakeups and on the retry timer.
pub(crate) struct BalloonWorker<G> {
    core: Arc<BalloonCore<G>>,
    /// A wakeup arrived since the last run.
    pending: bool,
    /// Deadline of the armed retry timer.
    retry_at: Option<Instant>,
    retry_interval: Duration,
}

impl<G: GuestPlatform> BalloonWorker<G> {
    pub(crate) fn new(core: Arc<BalloonCore<G>>) -> Self {
        let retry_interval = core.config().retry_interval();
        Self {
            core,
            pending: false,
            retry_at: None,
            retry_interval,
        }
    }

    fn run(&mut self) {
        self.pending = false;
        self.retry_at = None;
        match self.core.process() {
            Ok(report) => {
                debug!("balloon run: {report:?}");
                if report.retry {
                    self.retry_at = Some(Instant::now() + self.retry_interval);
                }
                if report.state == WorkerState::Converged {
                    trace!("balloon converged");
                }
            }
            Err(err) => error!("balloon run failed: {err}"),
        }
    }
}

impl<G: GuestPlatform> SingleThreadTaskWorker for BalloonWorker<G> {
    type Task = WakeReason;

    fn process(&mut self, task: Self::Task) {
        trace!("balloon worker woken: {task:?}");
        self.pending = true;
    }

    fn maintainance(&mut self) {
        let timer_fired = self
            .retry_at
            .is_some_and(|deadline| Instant::now() >= deadline);
        if timer_fired {
            self.process(WakeReason::RetryTimer);
        }
        if self.pending {
            self.run();
        }
    }

    fn poll_interval(&self) -> Duration {
        self.retry_at.map_or(self.retry_interval, |deadline| {
            deadline.saturating_duration_since(Instant::now())
        })
    }

    fn should_exit(&self) -> bool {
        self.core.is_halted()
    }
}
