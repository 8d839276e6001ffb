//! Scheduler engine: CRUD over the live job set and the polling tick loop.
//!
//! The engine is responsible for:
//! - Creating, updating, removing, and listing jobs (persisted per mutation)
//! - Collecting due jobs each tick and executing them concurrently
//! - The per-job single-flight lease: a running job cannot start again
//! - Recomputing `nextRunAtMs` from each run's completion instant
//! - Startup recovery after a crash or restart of arbitrary duration
//! - Event emission for every committed mutation and realised run

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::clock::{Clock, SystemClock};
use crate::core::job::{Job, JobDraft, JobPatch, JobState, PayloadError, Schedule};
use crate::core::schedule::{self, ScheduleError};
use crate::core::types::{JobId, RunId, RunStatus};
use crate::events::{CronEvent, EventBus};
use crate::executor::{ExecutionReport, JobExecutor};
use crate::storage::{JobStore, RunLog, RunRecord, StoreError};

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors surfaced by the scheduler API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Mutation or run of an unknown job id.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// Manual run collided with an in-flight execution of the same job.
    #[error("job is already running: {0}")]
    JobBusy(JobId),

    /// The schedule failed validation or calculation.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(#[from] ScheduleError),

    /// The payload failed validation.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] PayloadError),

    /// Persistence failed; the in-memory mutation was rolled back.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Point-in-time summary of the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerStatus {
    pub jobs: usize,
    pub enabled: usize,
    pub in_flight: usize,
    pub next_wake_at_ms: Option<i64>,
}

/// Shared state reachable from spawned executions.
struct SchedulerCore {
    clock: Arc<dyn Clock>,
    store: Arc<dyn JobStore>,
    executor: Arc<JobExecutor>,
    event_bus: Arc<EventBus>,
    run_log: Option<RunLog>,
    jobs: Mutex<HashMap<JobId, Job>>,
    in_flight: Mutex<HashSet<JobId>>,
}

/// The scheduler service. One instance owns one store file.
pub struct CronScheduler {
    core: Arc<SchedulerCore>,
    tick_interval: Duration,
    shutdown_grace: Duration,
    shutdown: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CronScheduler {
    /// Create a scheduler over the given store and executor.
    pub fn new(store: Arc<dyn JobStore>, executor: Arc<JobExecutor>) -> Self {
        Self {
            core: Arc::new(SchedulerCore {
                clock: Arc::new(SystemClock),
                store,
                executor,
                event_bus: Arc::new(EventBus::new()),
                run_log: None,
                jobs: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
            }),
            tick_interval: DEFAULT_TICK_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            shutdown: CancellationToken::new(),
            loop_handle: Mutex::new(None),
        }
    }

    fn core_mut(&mut self) -> &mut SchedulerCore {
        Arc::get_mut(&mut self.core).expect("scheduler configured after it was shared")
    }

    /// Inject a clock (tests use a deterministic one).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.core_mut().clock = clock;
        self
    }

    /// Set the event bus events are emitted on.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.core_mut().event_bus = event_bus;
        self
    }

    /// Record per-job run history to the given log.
    pub fn with_run_log(mut self, run_log: RunLog) -> Self {
        self.core_mut().run_log = Some(run_log);
        self
    }

    /// Set the tick interval (default 1s).
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Bound how long `stop` waits for in-flight executions (default 10s).
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// The event bus, for registering handlers.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.core.event_bus
    }

    /// Create a job: validates, assigns an id, computes the first fire
    /// instant, persists, and emits `job.added`.
    pub async fn add(&self, draft: JobDraft) -> Result<Job, SchedulerError> {
        self.core.add(draft).await
    }

    /// Remove a job. Returns false when the id is unknown.
    pub async fn remove(&self, id: &JobId) -> Result<bool, SchedulerError> {
        self.core.remove(id).await
    }

    /// Apply a partial update, recompute the next fire instant, persist,
    /// and emit `job.updated`.
    pub async fn update(&self, id: &JobId, patch: JobPatch) -> Result<Job, SchedulerError> {
        self.core.update(id, patch).await
    }

    /// Get a job by id.
    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.core.jobs.lock().await.get(id).cloned()
    }

    /// List jobs in creation order. Disabled jobs are included only on
    /// request.
    pub async fn list(&self, include_disabled: bool) -> Vec<Job> {
        self.core.list(include_disabled).await
    }

    /// Force an immediate execution outside the regular tick. Takes the
    /// same single-flight lease as the tick path.
    pub async fn run(&self, id: &JobId) -> Result<ExecutionReport, SchedulerError> {
        self.core.run(id).await
    }

    /// Point-in-time summary.
    pub async fn status(&self) -> SchedulerStatus {
        self.core.status().await
    }

    /// Recent run history for a job, newest first. Empty without a run log.
    pub async fn runs(&self, id: &JobId, limit: usize) -> Result<Vec<RunRecord>, SchedulerError> {
        match &self.core.run_log {
            Some(run_log) => Ok(run_log.recent(id, limit).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Load the store, recover stale fire times, and start the tick loop.
    ///
    /// Recovery: every enabled job whose `nextRunAtMs` is unset or in the
    /// past gets a fresh fire instant computed from now, so a restart of
    /// arbitrary duration produces at most one prompt fire per job instead
    /// of a backlog.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.core.load_and_recover().await?;

        let mut handle = self.loop_handle.lock().await;
        if handle.is_some() {
            warn!("Scheduler already started");
            return Ok(());
        }
        let core = Arc::clone(&self.core);
        let interval = self.tick_interval;
        let shutdown = self.shutdown.clone();
        *handle = Some(tokio::spawn(async move {
            SchedulerCore::run_loop(core, interval, shutdown).await;
        }));
        Ok(())
    }

    /// Stop the tick loop, wait (bounded) for in-flight executions, and
    /// persist one final snapshot.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler loop task failed");
            }
        }

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            loop {
                if self.core.in_flight.lock().await.is_empty() {
                    break;
                }
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("Shutdown grace elapsed with executions still in flight");
        }

        let jobs = self.core.jobs.lock().await;
        if let Err(e) = self.core.persist(&jobs).await {
            warn!(error = %e, "Failed to persist final snapshot");
        }
        info!("Cron scheduler shut down");
    }

    /// One pass of the polling loop: collect due jobs, lease them, and
    /// spawn their executions. Public so tests can drive ticks directly.
    pub async fn tick(&self) {
        SchedulerCore::tick(&self.core).await;
    }
}

impl SchedulerCore {
    async fn run_loop(core: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        info!(interval = ?interval, "Cron scheduler started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => Self::tick(&core).await,
            }
        }
        info!("Cron scheduler tick loop stopped");
    }

    /// Collect due jobs and spawn one leased execution per job. Leases are
    /// taken under the store lock so a job can never be collected twice.
    async fn tick(core: &Arc<Self>) {
        let now = core.clock.now_ms();
        let mut to_spawn = Vec::new();

        {
            let jobs = core.jobs.lock().await;
            let mut in_flight = core.in_flight.lock().await;
            for job in jobs.values() {
                if !job.enabled {
                    continue;
                }
                if !job.state.next_run_at_ms.is_some_and(|next| next <= now) {
                    continue;
                }
                if in_flight.contains(&job.id) {
                    debug!(job_id = %job.id, "Previous execution still in flight, skipping this tick");
                    continue;
                }
                in_flight.insert(job.id.clone());
                to_spawn.push(job.clone());
            }
        }

        for job in to_spawn {
            let core = Arc::clone(core);
            tokio::spawn(async move {
                core.execute_leased(job).await;
            });
        }
    }

    async fn execute_leased(&self, job: Job) {
        let started_at_ms = self.clock.now_ms();
        debug!(job_id = %job.id, name = %job.name, "Executing due job");
        let report = self.executor.execute(&job).await;
        self.finish_run(&job, started_at_ms, &report).await;
        self.in_flight.lock().await.remove(&job.id);
    }

    async fn add(&self, draft: JobDraft) -> Result<Job, SchedulerError> {
        let now = self.clock.now_ms();
        schedule::validate(&draft.schedule, now)?;
        draft.payload.validate()?;

        let enabled = draft.enabled.unwrap_or(true);
        let next_run_at_ms = if enabled {
            schedule::next_run_at_ms(&draft.schedule, None, now)?
        } else {
            None
        };

        let job = Job {
            id: JobId::generate(),
            name: draft.name,
            enabled,
            schedule: draft.schedule,
            payload: draft.payload,
            delete_after_run: draft.delete_after_run,
            created_at_ms: now,
            updated_at_ms: now,
            state: JobState {
                next_run_at_ms,
                ..JobState::default()
            },
        };

        {
            let mut jobs = self.jobs.lock().await;
            jobs.insert(job.id.clone(), job.clone());
            if let Err(e) = self.persist(&jobs).await {
                jobs.remove(&job.id);
                return Err(e.into());
            }
        }

        info!(job_id = %job.id, name = %job.name, "Cron job added");
        self.event_bus
            .emit(CronEvent::JobAdded { job: job.clone() })
            .await;
        Ok(job)
    }

    async fn remove(&self, id: &JobId) -> Result<bool, SchedulerError> {
        let removed = {
            let mut jobs = self.jobs.lock().await;
            let Some(job) = jobs.remove(id) else {
                return Ok(false);
            };
            if let Err(e) = self.persist(&jobs).await {
                jobs.insert(id.clone(), job);
                return Err(e.into());
            }
            job
        };

        info!(job_id = %id, "Cron job removed");
        self.event_bus
            .emit(CronEvent::JobRemoved { job: removed })
            .await;
        Ok(true)
    }

    async fn update(&self, id: &JobId, patch: JobPatch) -> Result<Job, SchedulerError> {
        let now = self.clock.now_ms();
        if let Some(schedule) = &patch.schedule {
            schedule::validate(schedule, now)?;
        }
        if let Some(payload) = &patch.payload {
            payload.validate()?;
        }

        let updated = {
            let mut jobs = self.jobs.lock().await;
            let Some(previous) = jobs.get(id).cloned() else {
                return Err(SchedulerError::JobNotFound(id.clone()));
            };

            let mut job = previous.clone();
            if let Some(name) = patch.name {
                job.name = name;
            }
            if let Some(enabled) = patch.enabled {
                job.enabled = enabled;
            }
            if let Some(schedule) = patch.schedule {
                job.schedule = schedule;
            }
            if let Some(payload) = patch.payload {
                job.payload = payload;
            }
            if let Some(delete_after_run) = patch.delete_after_run {
                job.delete_after_run = delete_after_run;
            }
            job.updated_at_ms = now;
            job.state.next_run_at_ms = if job.enabled {
                schedule::next_run_at_ms(&job.schedule, job.state.last_run_at_ms, now)?
            } else {
                None
            };

            jobs.insert(id.clone(), job.clone());
            if let Err(e) = self.persist(&jobs).await {
                jobs.insert(id.clone(), previous);
                return Err(e.into());
            }
            job
        };

        info!(job_id = %id, "Cron job updated");
        self.event_bus
            .emit(CronEvent::JobUpdated {
                job: updated.clone(),
            })
            .await;
        Ok(updated)
    }

    async fn list(&self, include_disabled: bool) -> Vec<Job> {
        let jobs = self.jobs.lock().await;
        let mut result: Vec<Job> = jobs
            .values()
            .filter(|job| include_disabled || job.enabled)
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        result
    }

    async fn run(&self, id: &JobId) -> Result<ExecutionReport, SchedulerError> {
        let job = self
            .jobs
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::JobNotFound(id.clone()))?;

        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(id.clone()) {
                return Err(SchedulerError::JobBusy(id.clone()));
            }
        }

        let started_at_ms = self.clock.now_ms();
        let report = self.executor.execute(&job).await;
        self.finish_run(&job, started_at_ms, &report).await;
        self.in_flight.lock().await.remove(id);
        Ok(report)
    }

    async fn status(&self) -> SchedulerStatus {
        let (jobs, enabled, next_wake_at_ms) = {
            let jobs = self.jobs.lock().await;
            let enabled = jobs.values().filter(|j| j.enabled).count();
            let next_wake_at_ms = jobs
                .values()
                .filter(|j| j.enabled)
                .filter_map(|j| j.state.next_run_at_ms)
                .min();
            (jobs.len(), enabled, next_wake_at_ms)
        };
        let in_flight = self.in_flight.lock().await.len();
        SchedulerStatus {
            jobs,
            enabled,
            in_flight,
            next_wake_at_ms,
        }
    }

    async fn load_and_recover(&self) -> Result<(), SchedulerError> {
        let loaded = self.store.load().await?;
        let now = self.clock.now_ms();

        let mut jobs = self.jobs.lock().await;
        jobs.clear();
        for mut job in loaded {
            if job.enabled {
                let stale = job.state.next_run_at_ms.map_or(true, |next| next < now);
                if stale {
                    match schedule::next_run_at_ms(&job.schedule, job.state.last_run_at_ms, now) {
                        Ok(next) => job.state.next_run_at_ms = next,
                        Err(e) => {
                            warn!(job_id = %job.id, error = %e, "Failed to recompute next run, disabling job");
                            job.enabled = false;
                            job.state.next_run_at_ms = None;
                        }
                    }
                }
            } else {
                job.state.next_run_at_ms = None;
            }
            jobs.insert(job.id.clone(), job);
        }
        info!(jobs = jobs.len(), "Cron scheduler loaded job store");
        Ok(())
    }

    /// Commit a run's outcome: last-run bookkeeping, next fire instant
    /// computed from the completion instant, persistence, history, event.
    ///
    /// A persist failure here is logged but does not fail the run; the
    /// in-memory set stays authoritative until the next successful save.
    async fn finish_run(&self, job: &Job, started_at_ms: i64, report: &ExecutionReport) {
        let now = self.clock.now_ms();
        let ran = {
            let mut jobs = self.jobs.lock().await;
            match jobs.get(&job.id).cloned() {
                Some(mut current) => {
                    current.state.last_run_at_ms = Some(now);
                    current.state.run_count += 1;
                    current.state.last_status = Some(report.status);
                    current.state.last_error = report.error.clone();

                    if matches!(current.schedule, Schedule::At { .. }) {
                        current.enabled = false;
                    }
                    if current.enabled {
                        match schedule::next_run_at_ms(
                            &current.schedule,
                            current.state.last_run_at_ms,
                            now,
                        ) {
                            Ok(next) => current.state.next_run_at_ms = next,
                            Err(e) => {
                                warn!(job_id = %job.id, error = %e, "Failed to compute next run");
                                current.state.next_run_at_ms = None;
                            }
                        }
                    } else {
                        current.state.next_run_at_ms = None;
                    }

                    if current.delete_after_run && report.status == RunStatus::Ok {
                        jobs.remove(&job.id);
                    } else {
                        jobs.insert(job.id.clone(), current.clone());
                    }
                    if let Err(e) = self.persist(&jobs).await {
                        warn!(job_id = %job.id, error = %e, "Failed to persist job state after run");
                    }
                    current
                }
                None => {
                    warn!(job_id = %job.id, "Job disappeared during execution");
                    job.clone()
                }
            }
        };

        if let Some(run_log) = &self.run_log {
            let record = RunRecord {
                run_id: RunId::new(),
                job_id: job.id.clone(),
                started_at_ms,
                ended_at_ms: now,
                status: report.status,
                error: report.error.clone(),
            };
            if let Err(e) = run_log.append(&record).await {
                warn!(job_id = %job.id, error = %e, "Failed to record run history");
            }
        }

        info!(
            job_id = %job.id,
            status = %report.status,
            run_count = ran.state.run_count,
            "Cron job ran"
        );
        self.event_bus
            .emit(CronEvent::JobRan {
                job: ran,
                report: report.clone(),
            })
            .await;
    }

    /// Persist the full snapshot in stable (creation) order.
    async fn persist(&self, jobs: &HashMap<JobId, Job>) -> Result<(), StoreError> {
        let mut snapshot: Vec<Job> = jobs.values().cloned().collect();
        snapshot.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        self.store.save(&snapshot).await
    }
}
