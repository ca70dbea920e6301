//! Background worker pool that performs tile loads.
//!
//! A fixed number of named worker threads pull boxed jobs from one
//! crossbeam channel. Submitting never blocks; excess work waits in the
//! queue instead of spawning more threads.

use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, unbounded};
use serde::{Deserialize, Serialize};

const MAX_DEFAULT_WORKERS: usize = 8;

pub type LoadJob = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadSchedulerConfig {
    pub worker_threads: usize,
    pub thread_name_prefix: String,
}

impl Default for LoadSchedulerConfig {
    fn default() -> Self {
        let parallelism = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(2);
        Self {
            worker_threads: parallelism.min(MAX_DEFAULT_WORKERS),
            thread_name_prefix: "tile-loader".to_owned(),
        }
    }
}

impl LoadSchedulerConfig {
    pub fn with_workers(worker_threads: usize) -> Self {
        Self {
            worker_threads,
            ..Self::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("load scheduler needs at least one worker thread")]
    NoWorkers,
    #[error("failed to spawn load worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("load scheduler workers are gone")]
    Disconnected,
    #[error("load scheduler is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
}

impl SchedulerStats {
    /// Jobs that are queued or running.
    pub fn pending(&self) -> u64 {
        self.submitted
            .saturating_sub(self.completed)
            .saturating_sub(self.panicked)
    }
}

#[derive(Default)]
struct SchedulerCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

pub struct LoadScheduler {
    sender: Option<Sender<LoadJob>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<SchedulerCounters>,
    closed: AtomicBool,
}

impl LoadScheduler {
    pub fn new(config: &LoadSchedulerConfig) -> Result<Self, SchedulerError> {
        if config.worker_threads == 0 {
            return Err(SchedulerError::NoWorkers);
        }
        let (sender, receiver) = unbounded::<LoadJob>();
        let counters = Arc::new(SchedulerCounters::default());
        let mut scheduler = Self {
            sender: Some(sender),
            workers: Vec::with_capacity(config.worker_threads),
            counters: Arc::clone(&counters),
            closed: AtomicBool::new(false),
        };
        for index in 0..config.worker_threads {
            let receiver = receiver.clone();
            let counters = Arc::clone(&counters);
            // on error the partially built scheduler drops and joins what it spawned
            let handle = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name_prefix))
                .spawn(move || worker_loop(receiver, counters))?;
            scheduler.workers.push(handle);
        }
        log::debug!(
            "load scheduler started with {} workers",
            config.worker_threads
        );
        Ok(scheduler)
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), SchedulerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SchedulerError::Closed);
        }
        let Some(sender) = &self.sender else {
            return Err(SchedulerError::Disconnected);
        };
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        match sender.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => unreachable!("load queue is unbounded"),
            Err(TrySendError::Disconnected(_)) => {
                self.counters.submitted.fetch_sub(1, Ordering::Relaxed);
                Err(SchedulerError::Disconnected)
            }
        }
    }

    /// Rejects further jobs. Jobs already queued still run.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            log::debug!("load scheduler closed with {} jobs pending", self.stats().pending());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }

    /// Polls until every submitted job has finished or `timeout` elapses.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.stats().pending() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Runs every queued job, then joins the workers.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // workers leave their loop once the channel is empty and disconnected
        drop(self.sender.take());
        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::error!("load worker exited with a panic");
            }
        }
    }
}

impl Drop for LoadScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(receiver: Receiver<LoadJob>, counters: Arc<SchedulerCounters>) {
    for job in receiver.iter() {
        match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "load job panicked on {}: {}",
                    thread::current().name().unwrap_or("unnamed worker"),
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::{LoadScheduler, LoadSchedulerConfig, SchedulerError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn jobs_run_on_named_workers() {
        let config = LoadSchedulerConfig {
            worker_threads: 2,
            thread_name_prefix: "test-loader".to_owned(),
        };
        let scheduler = LoadScheduler::new(&config).expect("scheduler");
        let (sender, receiver) = crossbeam_channel::unbounded();
        for _ in 0..4 {
            let sender = sender.clone();
            scheduler
                .submit(move || {
                    let name = std::thread::current().name().map(str::to_owned);
                    sender.send(name).expect("send thread name");
                })
                .expect("submit");
        }
        for _ in 0..4 {
            let name = receiver
                .recv_timeout(Duration::from_secs(5))
                .expect("job result")
                .expect("worker thread is named");
            assert!(name.starts_with("test-loader-"), "unexpected name {name}");
        }
        assert_eq!(scheduler.worker_count(), 2);
    }

    #[test]
    fn panicking_job_does_not_kill_the_worker() {
        let scheduler = LoadScheduler::new(&LoadSchedulerConfig::with_workers(1)).expect("scheduler");
        let ran = Arc::new(AtomicUsize::new(0));

        scheduler.submit(|| panic!("broken tile")).expect("submit");
        let counter = Arc::clone(&ran);
        scheduler
            .submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit");

        assert!(scheduler.wait_idle(Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        let stats = scheduler.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.panicked, 1);
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let scheduler = LoadScheduler::new(&LoadSchedulerConfig::with_workers(1)).expect("scheduler");
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let counter = Arc::clone(&ran);
            scheduler
                .submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .expect("submit");
        }
        scheduler.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn closed_scheduler_rejects_jobs_but_runs_queued_ones() {
        let scheduler = LoadScheduler::new(&LoadSchedulerConfig::with_workers(1)).expect("scheduler");
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        scheduler
            .submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit");

        scheduler.close();

        assert!(scheduler.is_closed());
        assert!(matches!(scheduler.submit(|| {}), Err(SchedulerError::Closed)));
        assert!(scheduler.wait_idle(Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.stats().submitted, 1);
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(
            LoadScheduler::new(&LoadSchedulerConfig::with_workers(0)),
            Err(SchedulerError::NoWorkers)
        ));
    }

    #[test]
    fn default_config_is_bounded() {
        let config = LoadSchedulerConfig::default();
        assert!(config.worker_threads >= 1);
        assert!(config.worker_threads <= 8);
    }
}
