use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use log::{debug, info};

pub(crate) trait SingleThreadTaskWorker {
    type Task;

    fn process(&mut self, task: Self::Task);

    fn maintainance(&mut self);

    /// Longest time to block on the channel before `maintainance` runs again.
    fn poll_interval(&self) -> Duration;

    /// Returns `true` once the worker cannot make progress anymore.
    fn should_exit(&self) -> bool {
        false
    }

    /// Spawns the worker on a dedicated thread.
    ///
    /// Every task received is passed to `process`, then everything already
    /// queued is drained the same way before a single `maintainance` call.
    fn spawn(
        mut self,
        rx: TaskRx<Self::Task>,
        name: &str,
        abort: AbortSignal,
    ) -> io::Result<JoinHandle<()>>
    where
        Self: Sized + Send + 'static,
        Self::Task: Send + 'static,
    {
        let name = name.to_owned();
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                info!("worker {name} running");
                loop {
                    if abort.should_abort() || self.should_exit() {
                        break;
                    }
                    match rx.recv_timeout(self.poll_interval()) {
                        Ok(task) => {
                            self.process(task);
                            for task in rx.try_iter() {
                                self.process(task);
                            }
                        }
                        Err(flume::RecvTimeoutError::Timeout) => {}
                        Err(flume::RecvTimeoutError::Disconnected) => {
                            debug!("task channel of worker {name} closed");
                            break;
                        }
                    }
                    self.maintainance();
                }
                info!("worker {name} exited");
            })
    }
}

pub(crate) struct TaskTx<T> {
    inner: flume::Sender<T>,
}

impl<T> TaskTx<T> {
    /// Queues a task; a worker that already exited simply never sees it.
    pub(crate) fn send(&self, task: T) {
        if self.inner.send(task).is_err() {
            debug!("task dropped, worker not running");
        }
    }
}

impl<T> Clone for TaskTx<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub(crate) struct TaskRx<T> {
    inner: flume::Receiver<T>,
}

impl<T> TaskRx<T> {
    fn recv_timeout(&self, timeout: Duration) -> Result<T, flume::RecvTimeoutError> {
        self.inner.recv_timeout(timeout)
    }

    fn try_iter(&self) -> flume::TryIter<'_, T> {
        self.inner.try_iter()
    }
}

pub(crate) fn task_channel<T>() -> (TaskTx<T>, TaskRx<T>) {
    let (tx, rx) = flume::unbounded();
    (TaskTx { inner: tx }, TaskRx { inner: rx })
}

#[derive(Debug, Clone)]
pub(crate) struct AbortSignal {
    inner: Arc<AtomicBool>,
}

impl AbortSignal {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(AtomicBool::new(false)),
        }
    }

    fn should_abort(&self) -> bool {
        self.inner.load(Ordering::Relaxed)
    }

    pub(crate) fn abort(&self) {
        self.inner.store(true, Ordering::Relaxed);
    }
}
