//! The level-ordered concurrent execution engine.
//!
//! [`LevelRunner`] runs any collection of participants by reading their
//! levels: participants are partitioned into ascending level groups, one
//! task per participant per level is submitted to a bounded worker pool, and
//! the runner waits for each level to finish before starting the next. On
//! the final level the caller may choose not to block, in which case tasks
//! are handed to the pool and the call returns immediately; `await_done`
//! joins with that outstanding work later.
//!
//! The implementing strategy provides the task factory, for instance moving
//! an actuator or triggering a detector.
//!
//! # Failure model
//!
//! A failing task records its error as the run's *sticky* fatal error and
//! the engine cancels the pool. The error surfaces from the blocking wait of
//! the same call where there is one; for non-blocking submissions it is
//! re-raised by `await_done` and by every subsequent `run` until `reset()`
//! is called. Once an abort is recorded no further level advances.
//!
//! # Pool policy
//!
//! The pool is created lazily on first use and retired by `await_done` or
//! `abort`. Concurrency is bounded at twice the core worker count; the
//! backlog is bounded too, and submissions beyond it are *dropped*. The drop
//! is a deliberate degradation valve for massively parallel levels, kept
//! observable through a counter and a warning log rather than silent.

pub mod detector;
pub mod positioner;

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::config::{PoolSettings, ScanSettings};
use crate::error::{ScanError, ScanResult};
use crate::events::{PositionDelegate, PositionEvent, PositionListener};
use crate::position::Position;

/// A unit of work for one participant at one level. Resolves to the
/// single-axis position the participant reached, or `None` when it has
/// nothing to report.
pub type LevelTask = BoxFuture<'static, ScanResult<Option<Position>>>;

/// Strategy implemented by each [`LevelRunner`] specialization: supplies the
/// participant collection for a position and turns participants into tasks.
pub trait LevelStrategy: Send + Sync {
    /// Participant handle, cheap to clone (typically an `Arc`).
    type Device: Clone + Send + Sync + 'static;

    /// The participants to order by level for this position. Rebuilt on
    /// every run; the collection may legitimately differ position to
    /// position.
    fn devices(&self, position: &Position) -> ScanResult<Vec<Self::Device>>;

    /// The participant's ordering level.
    fn device_level(&self, device: &Self::Device) -> i32;

    /// The participant's name, for events and error messages.
    fn device_name(&self, device: &Self::Device) -> String;

    /// Build the task for one participant at the given position. `None`
    /// means there is nothing to do for this participant this time, which is
    /// legal.
    fn create_task(&self, device: &Self::Device, position: &Position) -> Option<LevelTask>;

    /// Wait bound for one level of these devices. `None` means use the
    /// runner's default.
    fn level_timeout(&self, devices: &[Self::Device]) -> Option<Duration> {
        let _ = devices;
        None
    }
}

/// First-error-wins store shared between the engine and its spawned tasks.
#[derive(Default)]
struct AbortState {
    error: Mutex<Option<Arc<ScanError>>>,
}

impl AbortState {
    fn get(&self) -> Option<Arc<ScanError>> {
        match self.error.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Record the error unless one is already sticky; returns the sticky one.
    fn record(&self, error: ScanError) -> Arc<ScanError> {
        let mut guard = match self.error.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_none() {
            *guard = Some(Arc::new(error));
        }
        match guard.as_ref() {
            Some(sticky) => Arc::clone(sticky),
            // record above guarantees presence; satisfy the type without panicking
            None => Arc::new(ScanError::IllegalState("abort state empty".to_string())),
        }
    }

    fn clear(&self) {
        match self.error.lock() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

/// Bounded worker pool backing one runner. Parallelism is limited by a
/// semaphore sized at twice the core worker count; the backlog is bounded
/// with a drop-on-overflow policy.
struct WorkerPool {
    tasks: JoinSet<ScanResult<Option<Position>>>,
    semaphore: Arc<Semaphore>,
    backlog: usize,
    dropped: Arc<AtomicU64>,
}

impl WorkerPool {
    fn new(settings: &PoolSettings, dropped: Arc<AtomicU64>) -> Self {
        let core = settings.core_workers();
        Self {
            tasks: JoinSet::new(),
            semaphore: Arc::new(Semaphore::new(core * 2)),
            backlog: settings.backlog,
            dropped,
        }
    }

    /// Hand a task to the pool, or drop it if the backlog is full.
    fn submit(&mut self, name: String, task: LevelTask, abort: Arc<AbortState>) {
        if self.tasks.len() >= self.backlog {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(task = %name, total_dropped = total, "worker pool backlog full, dropping task");
            return;
        }
        let semaphore = Arc::clone(&self.semaphore);
        self.tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| ScanError::IllegalState("worker pool closed".to_string()))?;
            // A queued task does not start once a fatal error is sticky.
            if let Some(sticky) = abort.get() {
                return Err(ScanError::aborted(sticky));
            }
            match task.await {
                Ok(result) => Ok(result),
                Err(err) => {
                    error!(device = %name, error = %err, "task failed, aborting run");
                    let sticky = abort.record(err);
                    Err(ScanError::aborted(sticky))
                }
            }
        });
    }

    /// Wait for every outstanding task within `timeout`, returning the
    /// positions they reported. The first task error wins and the rest of
    /// the results are discarded.
    async fn drain(&mut self, timeout: Duration, what: &str) -> ScanResult<Vec<Position>> {
        let joined = tokio::time::timeout(timeout, async {
            let mut results = Vec::new();
            while let Some(joined) = self.tasks.join_next().await {
                match joined {
                    Ok(Ok(Some(position))) => results.push(position),
                    Ok(Ok(None)) => {}
                    Ok(Err(err)) => return Err(err),
                    Err(join_err) if join_err.is_cancelled() => {}
                    Err(join_err) => {
                        return Err(ScanError::device("worker", join_err));
                    }
                }
            }
            Ok(results)
        })
        .await;
        match joined {
            Ok(result) => result,
            Err(_elapsed) => Err(ScanError::Timeout {
                waited: timeout,
                what: what.to_string(),
            }),
        }
    }

    fn pending(&self) -> usize {
        self.tasks.len()
    }
}

// Dropping a JoinSet aborts its tasks, so retiring the pool cancels all
// queued and running work.

/// Generic engine running a strategy's participants level by level.
pub struct LevelRunner<S: LevelStrategy> {
    strategy: S,
    delegate: PositionDelegate,
    pool_settings: PoolSettings,
    default_timeout: Duration,
    pool: Option<WorkerPool>,
    abort: Arc<AbortState>,
    dropped: Arc<AtomicU64>,
    position: Option<Position>,
}

impl<S: LevelStrategy> LevelRunner<S> {
    /// Engine over the given strategy. `default_timeout` bounds level waits
    /// when the strategy declares none.
    pub fn new(strategy: S, settings: &ScanSettings, default_timeout: Duration) -> Self {
        Self {
            strategy,
            delegate: PositionDelegate::new(),
            pool_settings: settings.pool.clone(),
            default_timeout,
            pool: None,
            abort: Arc::new(AbortState::default()),
            dropped: Arc::new(AtomicU64::new(0)),
            position: None,
        }
    }

    /// The strategy backing this runner.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Mutable access to the strategy (e.g. to attach monitors).
    pub fn strategy_mut(&mut self) -> &mut S {
        &mut self.strategy
    }

    /// The listener delegate for this runner. Cloning it shares the
    /// listener list with spawned tasks.
    pub fn delegate(&self) -> &PositionDelegate {
        &self.delegate
    }

    /// Register a progress listener.
    pub fn add_listener(&self, listener: Arc<dyn PositionListener>) {
        self.delegate.add_listener(listener);
    }

    /// Number of tasks dropped by the backlog valve since construction.
    pub fn dropped_tasks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Run every participant for `position`, level by level.
    ///
    /// With `block = true` the call returns once every level has completed.
    /// With `block = false` the final level's tasks are submitted but not
    /// awaited; call [`await_done`](Self::await_done) before trusting their
    /// side effects. A new run first joins any tasks still outstanding from
    /// an earlier non-blocking call; their results belong to that call and
    /// are discarded. Returns `Ok(false)` when a listener vetoed the run (no
    /// work was done).
    pub async fn run(&mut self, position: &Position, block: bool) -> ScanResult<bool> {
        if let Some(sticky) = self.abort.get() {
            return Err(ScanError::aborted(sticky));
        }
        if let Some(pool) = self.pool.as_mut() {
            let pending = pool.pending();
            if pending > 0 {
                debug!(pending, "joining leftover tasks before a new run");
                if let Err(err) = pool.drain(self.default_timeout, "leftover tasks").await {
                    self.pool = None;
                    return Err(err);
                }
            }
        }
        self.position = Some(position.clone());

        if !self
            .delegate
            .fire_position_will_perform(&PositionEvent::new(position.clone()))
        {
            return Ok(false);
        }

        let devices = self.strategy.devices(position)?;
        let mut by_level: BTreeMap<i32, Vec<S::Device>> = BTreeMap::new();
        for device in devices {
            by_level
                .entry(self.strategy.device_level(&device))
                .or_default()
                .push(device);
        }

        let level_count = by_level.len();
        for (i, (level, level_devices)) in by_level.into_iter().enumerate() {
            if let Some(sticky) = self.abort.get() {
                self.pool = None;
                return Err(ScanError::aborted(sticky));
            }

            let mut names = Vec::with_capacity(level_devices.len());
            let mut tasks = Vec::with_capacity(level_devices.len());
            for device in &level_devices {
                // A strategy may return no task for a participant; skip it.
                if let Some(task) = self.strategy.create_task(device, position) {
                    names.push(self.strategy.device_name(device));
                    tasks.push((self.strategy.device_name(device), task));
                }
            }

            debug!(level, tasks = tasks.len(), "submitting level");
            {
                let dropped = Arc::clone(&self.dropped);
                let settings = self.pool_settings.clone();
                let pool = self
                    .pool
                    .get_or_insert_with(|| WorkerPool::new(&settings, dropped));
                for (name, task) in tasks {
                    pool.submit(name, task, Arc::clone(&self.abort));
                }
            }

            let last_level = i + 1 == level_count;
            if last_level && !block {
                // Tasks are in flight; the caller joins them via await_done.
                break;
            }

            let timeout = self
                .strategy
                .level_timeout(&level_devices)
                .unwrap_or(self.default_timeout);
            let drained = match self.pool.as_mut() {
                Some(pool) => {
                    pool.drain(timeout, &format!("level {level} devices")).await
                }
                None => Ok(Vec::new()),
            };
            let results = match drained {
                Ok(results) => results,
                Err(err) => {
                    // Forcefully cancel whatever is left of the level.
                    self.pool = None;
                    return Err(err);
                }
            };

            let composed = if results.is_empty() {
                position.clone()
            } else {
                let mut composed = Position::new().with_step_index(position.step_index());
                for result in &results {
                    composed = composed.compose(result);
                }
                composed
            };
            self.delegate
                .fire_level_performed(&PositionEvent::for_level(composed, level, names));
        }

        self.delegate
            .fire_position_performed(&PositionEvent::new(position.clone()));
        Ok(true)
    }

    /// Block until all previously submitted non-blocking tasks finish, then
    /// retire the worker pool. A no-op when nothing is pending; does not
    /// create a pool.
    pub async fn await_done(&mut self, timeout: Duration) -> ScanResult<Option<Position>> {
        if let Some(pool) = self.pool.as_mut() {
            let pending = pool.pending();
            let drained = if pending > 0 {
                debug!(pending, "awaiting outstanding tasks");
                pool.drain(timeout, "outstanding tasks").await.map(|_| ())
            } else {
                Ok(())
            };
            self.pool = None;
            drained?;
        }
        if let Some(sticky) = self.abort.get() {
            return Err(ScanError::aborted(sticky));
        }
        Ok(self.position.clone())
    }

    /// Cancel all queued and running tasks and free the pool. Idempotent.
    pub fn abort(&mut self) {
        if self.pool.take().is_some() {
            debug!("runner aborted, pool retired");
        }
    }

    /// Clear the sticky error, allowing reuse after a failure.
    pub fn reset(&mut self) {
        self.abort.clear();
    }

    /// The last position handed to `run`.
    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }
}
