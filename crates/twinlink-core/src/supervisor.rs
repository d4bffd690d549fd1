//! Poll supervisor.
//!
//! One task per [`PropertySpec`]. Each task fires at a fixed rate on a grid
//! anchored one interval after registration, reads the field, and hands the
//! value to the publisher. Ticks of one property run strictly one after the
//! other: fires that would overlap a running tick are dropped and the task
//! resumes on the next grid point. Ticks of all properties share a bounded
//! pool of worker permits.
//!
//! A failing or panicking tick is logged and skipped; it never ends its task
//! and never touches any other task.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::error::MappingError;
use crate::model::{PropertyPath, PropertySpec, TwinIdentity};
use crate::publish::PropertyPublisher;
use crate::source::SourceReader;

/// Per-task counters.
#[derive(Debug, Default)]
pub struct TaskStats {
    fired: AtomicU64,
    skipped: AtomicU64,
    publishes: AtomicU64,
    confirmed: AtomicU64,
    publish_failures: AtomicU64,
    last_confirmed_at: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`TaskStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Ticks started
    pub fired: u64,
    /// Ticks that ended without publishing
    pub skipped: u64,
    /// Publishes started
    pub publishes: u64,
    /// Publishes the destination acknowledged
    pub confirmed: u64,
    /// Publishes that failed
    pub publish_failures: u64,
    /// Time of the last acknowledged publish
    pub last_confirmed_at: Option<DateTime<Utc>>,
}

impl TaskStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fired: self.fired.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            publishes: self.publishes.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            last_confirmed_at: *self.last_confirmed_at.lock(),
        }
    }

    fn record_confirmed(&self) {
        self.confirmed.fetch_add(1, Ordering::Relaxed);
        *self.last_confirmed_at.lock() = Some(Utc::now());
    }
}

/// A registered poll task.
#[derive(Debug)]
pub struct PollHandle {
    spec: Arc<PropertySpec>,
    stats: Arc<TaskStats>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn spec(&self) -> &PropertySpec {
        &self.spec
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the task has ended. Poll tasks only end when aborted.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Owns the poll tasks of one twin.
pub struct PollSupervisor {
    twin: TwinIdentity,
    reader: Arc<dyn SourceReader>,
    publisher: Arc<dyn PropertyPublisher>,
    workers: Arc<Semaphore>,
    tasks: Vec<PollHandle>,
}

impl PollSupervisor {
    /// Create a supervisor running at most `workers` ticks at a time.
    pub fn new(
        twin: TwinIdentity,
        reader: Arc<dyn SourceReader>,
        publisher: Arc<dyn PropertyPublisher>,
        workers: usize,
    ) -> Self {
        Self {
            twin,
            reader,
            publisher,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            tasks: Vec::new(),
        }
    }

    /// Register a periodic task for `spec`. The first tick fires one
    /// interval from now.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&mut self, spec: PropertySpec) -> Result<&PollHandle, MappingError> {
        if spec.poll_interval_ms == 0 {
            return Err(MappingError::InvalidRate {
                property: spec.name,
                rate: "0".to_string(),
            });
        }

        let spec = Arc::new(spec);
        let stats = Arc::new(TaskStats::default());
        let period = Duration::from_millis(spec.poll_interval_ms);
        let task = PollTask {
            path: PropertyPath::configuration(&spec.name),
            spec: spec.clone(),
            twin: self.twin.clone(),
            reader: self.reader.clone(),
            publisher: self.publisher.clone(),
            workers: self.workers.clone(),
            stats: stats.clone(),
        };
        let schedule = FixedRate::new(Instant::now() + period, period);

        info!(
            property = %spec.name,
            url = %spec.source_url,
            address = %spec.source_address,
            interval_ms = spec.poll_interval_ms,
            "Scheduled poll task"
        );

        let handle = tokio::spawn(task.run(schedule));
        self.tasks.push(PollHandle {
            spec,
            stats,
            task: handle,
        });
        Ok(&self.tasks[self.tasks.len() - 1])
    }

    /// Register a task for every spec.
    pub fn schedule_all(
        &mut self,
        specs: impl IntoIterator<Item = PropertySpec>,
    ) -> Result<(), MappingError> {
        for spec in specs {
            self.schedule(spec)?;
        }
        Ok(())
    }

    pub fn tasks(&self) -> &[PollHandle] {
        &self.tasks
    }

    /// Wait for the poll tasks. They run until the process ends, so this only
    /// returns early when nothing was scheduled.
    pub async fn run(self) {
        if self.tasks.is_empty() {
            warn!(twin = %self.twin, "No mapped properties, nothing to poll");
            return;
        }
        let handles = self.tasks.into_iter().map(|t| t.task);
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("Poll task ended: {}", e);
            }
        }
    }
}

/// Fixed-rate grid: fire `i` is due at `first + i * period`.
#[derive(Debug, Clone)]
struct FixedRate {
    first: Instant,
    period: Duration,
    next_index: u64,
}

impl FixedRate {
    fn new(first: Instant, period: Duration) -> Self {
        Self {
            first,
            period,
            next_index: 0,
        }
    }

    fn due(&self, index: u64) -> Instant {
        let nanos = self.period.as_nanos().saturating_mul(u128::from(index));
        self.first + Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Next fire time not earlier than `now`, and how many fires were dropped
    /// to get there.
    fn advance(&mut self, now: Instant) -> (Instant, u64) {
        let mut deadline = self.due(self.next_index);
        let mut dropped = 0;
        if deadline < now {
            let behind = (now - deadline).as_nanos();
            let period = self.period.as_nanos().max(1);
            dropped = u64::try_from(behind.div_ceil(period)).unwrap_or(u64::MAX);
            self.next_index = self.next_index.saturating_add(dropped);
            deadline = self.due(self.next_index);
        }
        self.next_index = self.next_index.saturating_add(1);
        (deadline, dropped)
    }
}

struct PollTask {
    spec: Arc<PropertySpec>,
    path: PropertyPath,
    twin: TwinIdentity,
    reader: Arc<dyn SourceReader>,
    publisher: Arc<dyn PropertyPublisher>,
    workers: Arc<Semaphore>,
    stats: Arc<TaskStats>,
}

impl PollTask {
    async fn run(self, mut schedule: FixedRate) {
        loop {
            let (deadline, dropped) = schedule.advance(Instant::now());
            if dropped > 0 {
                debug!(property = %self.spec.name, dropped, "Previous tick overran, dropping overlapping fires");
            }
            time::sleep_until(deadline).await;

            let Ok(_permit) = self.workers.acquire().await else {
                return;
            };
            self.stats.fired.fetch_add(1, Ordering::Relaxed);

            if let Err(panic) = AssertUnwindSafe(self.tick()).catch_unwind().await {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    property = %self.spec.name,
                    "Poll tick failed unexpectedly: {}",
                    panic_message(panic.as_ref())
                );
            }

            let stats = self.stats.snapshot();
            debug!(
                property = %self.spec.name,
                fired = stats.fired,
                skipped = stats.skipped,
                publishes = stats.publishes,
                confirmed = stats.confirmed,
                "Tick finished"
            );
        }
    }

    async fn tick(&self) {
        let value = match self.reader.read(&self.spec).await {
            Ok(value) => value,
            Err(e) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    property = %self.spec.name,
                    address = %self.spec.source_address,
                    error = %e,
                    "Issue with fetching field value, skipping tick"
                );
                return;
            }
        };

        debug!(property = %self.spec.name, %value, "Read field value");
        self.stats.publishes.fetch_add(1, Ordering::Relaxed);

        let stats = self.stats.clone();
        let property = self.spec.name.clone();
        self.publisher
            .publish(&self.twin, &self.path, value)
            .on_complete(move |outcome| match outcome {
                Ok(()) => {
                    stats.record_confirmed();
                    debug!(property = %property, "Sent update to twin");
                }
                Err(e) => {
                    stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(property = %property, error = %e, "Unable to send update to twin");
                }
            });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
