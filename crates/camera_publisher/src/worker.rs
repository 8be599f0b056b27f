//! Lifecycle-managed publish loop.
//!
//! A [`PublishWorker`] owns a [`FrameSource`] and a [`FramePublisher`]. While
//! running, both are moved onto a dedicated loop thread; `stop` clears the
//! running flag, joins the thread and only then tears down the endpoint and
//! the source. The join is the only synchronisation point, so neither half
//! needs a lock.
//!
//! ```text
//! Idle --start--> Running --stop--> Stopped
//!   \_____________stop______________/
//! ```

use crate::source::{FrameSource, Skip};
use crate::transport::{EmitFlags, EndpointOption, FramePublisher, TransportError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Errors returned by worker lifecycle calls
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker '{0}' is stopped and cannot be restarted")]
    Stopped(String),
    #[error("Worker '{0}' is running, options must be set before start")]
    AlreadyRunning(String),
    #[error("Failed to spawn loop thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Endpoint bound, no thread
    Idle,
    Running,
    /// Terminal
    Stopped,
}

/// Per-worker counters, readable from any thread
#[derive(Debug, Default)]
pub struct WorkerStats {
    published: AtomicU64,
    skipped: [AtomicU64; Skip::COUNT],
}

impl WorkerStats {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn skipped(&self, kind: Skip) -> u64 {
        self.skipped[kind.index()].load(Ordering::Relaxed)
    }

    pub fn total_skipped(&self) -> u64 {
        Skip::ALL.iter().map(|kind| self.skipped(*kind)).sum()
    }

    fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    fn record_skip(&self, kind: Skip) {
        self.skipped[kind.index()].fetch_add(1, Ordering::Relaxed);
    }
}

/// A loop thread bound to its cancellation flag
struct LoopHandle<T> {
    running: Arc<AtomicBool>,
    thread: JoinHandle<T>,
}

impl<T: Send + 'static> LoopHandle<T> {
    fn spawn<F>(name: String, running: Arc<AtomicBool>, body: F) -> std::io::Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        running.store(true, Ordering::Release);
        match thread::Builder::new().name(name).spawn(body) {
            Ok(thread) => Ok(Self { running, thread }),
            Err(e) => {
                running.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Request cooperative cancellation and block until the loop returns
    fn cancel_and_join(self) -> thread::Result<T> {
        self.running.store(false, Ordering::Release);
        self.thread.join()
    }
}

/// Background worker that repeatedly produces a frame and publishes it
pub struct PublishWorker<S: FrameSource, P: FramePublisher> {
    name: String,
    running: Arc<AtomicBool>,
    state: WorkerState,
    // Present while Idle; moved onto the loop thread while Running
    parts: Option<(S, P)>,
    handle: Option<LoopHandle<(S, P)>>,
    stats: Arc<WorkerStats>,
}

impl<S: FrameSource, P: FramePublisher> PublishWorker<S, P> {
    /// Create an idle worker around an already bound publisher
    pub fn new(name: impl Into<String>, source: S, publisher: P) -> Self {
        Self {
            name: name.into(),
            running: Arc::new(AtomicBool::new(false)),
            state: WorkerState::Idle,
            parts: Some((source, publisher)),
            handle: None,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Point-in-time read of the running flag
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// The endpoint, while it is not lent to the loop thread
    pub fn publisher(&self) -> Option<&P> {
        self.parts.as_ref().map(|(_, publisher)| publisher)
    }

    /// Tune the endpoint before the loop starts
    pub fn configure_option(&mut self, option: EndpointOption) -> Result<(), WorkerError> {
        match (&mut self.parts, self.state) {
            (Some((_, publisher)), WorkerState::Idle) => Ok(publisher.configure(option)?),
            (_, WorkerState::Running) => Err(WorkerError::AlreadyRunning(self.name.clone())),
            _ => Err(WorkerError::Stopped(self.name.clone())),
        }
    }

    /// Spawn the loop thread. Starting a running worker is a no-op.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        match self.state {
            WorkerState::Running => {
                log::debug!("[{}] Already running", self.name);
                return Ok(());
            }
            WorkerState::Stopped => return Err(WorkerError::Stopped(self.name.clone())),
            WorkerState::Idle => {}
        }

        let Some((source, publisher)) = self.parts.take() else {
            return Err(WorkerError::Stopped(self.name.clone()));
        };

        let name = self.name.clone();
        let running = self.running.clone();
        let stats = self.stats.clone();
        let spawned = LoopHandle::spawn(format!("publish-{}", self.name), running.clone(), {
            move || run_loop(&name, &running, source, publisher, &stats)
        });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = WorkerState::Running;
                log::info!("[{}] Started", self.name);
                Ok(())
            }
            Err(e) => {
                // The source and endpoint went down with the closure
                self.state = WorkerState::Stopped;
                log::error!("[{}] Failed to spawn loop thread: {}", self.name, e);
                Err(WorkerError::Spawn(e))
            }
        }
    }

    /// Stop the loop, close the endpoint, then release the source.
    ///
    /// Blocks until the in-flight iteration completes. Safe to call any
    /// number of times, including on a worker that was never started.
    pub fn stop(&mut self) {
        if self.state == WorkerState::Stopped {
            return;
        }
        self.running.store(false, Ordering::Release);

        let parts = match self.handle.take() {
            Some(handle) => match handle.cancel_and_join() {
                Ok(parts) => Some(parts),
                Err(_) => {
                    log::error!("[{}] Loop thread terminated abnormally", self.name);
                    None
                }
            },
            None => self.parts.take(),
        };

        if let Some((mut source, mut publisher)) = parts {
            if let Err(e) = publisher.close() {
                log::warn!("[{}] Failed to close endpoint: {}", self.name, e);
            }
            source.release();
        }

        self.state = WorkerState::Stopped;
        log::info!(
            "[{}] Stopped: {} published, {} skipped",
            self.name,
            self.stats.published(),
            self.stats.total_skipped()
        );
    }
}

impl<S: FrameSource, P: FramePublisher> Drop for PublishWorker<S, P> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<S: FrameSource, P: FramePublisher>(
    name: &str,
    running: &AtomicBool,
    mut source: S,
    mut publisher: P,
    stats: &WorkerStats,
) -> (S, P) {
    let mut sequence: u64 = 0;
    let mut last_log = Instant::now();

    while running.load(Ordering::Acquire) {
        // A panic must not end the thread while the flag still says running
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            iterate(&mut source, &mut publisher, sequence)
        }))
        .unwrap_or(Err(Skip::Panicked));

        match outcome {
            Ok(()) => {
                sequence += 1;
                stats.record_published();
            }
            Err(skip) => {
                if stats.skipped(skip) == 0 {
                    log::warn!("[{}] First skipped iteration: {}", name, skip);
                } else {
                    log::trace!("[{}] Skipped iteration: {}", name, skip);
                }
                stats.record_skip(skip);
            }
        }

        if last_log.elapsed() >= STATS_INTERVAL {
            log::info!(
                "[{}] frame {}, {} published, {} skipped",
                name,
                sequence,
                stats.published(),
                stats.total_skipped()
            );
            last_log = Instant::now();
        }
    }

    (source, publisher)
}

fn iterate<S: FrameSource, P: FramePublisher>(
    source: &mut S,
    publisher: &mut P,
    sequence: u64,
) -> Result<(), Skip> {
    let frame = source.produce()?;
    let flags = EmitFlags {
        content_type: frame.content_type,
        sequence: Some(sequence),
    };
    publisher.emit(frame.payload, flags).map_err(|e| {
        log::trace!("Send failed: {}", e);
        Skip::SendFailed
    })
}
