//! Common test utilities shared across integration tests.

use std::sync::Arc;
use std::time::Duration;

use mozi_cron::testing::ManualClock;
use mozi_cron::{
    ChannelRegistry, CronScheduler, JobDraft, JobExecutor, JobId, JobStore, Payload, Schedule,
};

pub const START: i64 = 1_000_000;
pub const MINUTE: i64 = 60_000;

/// A scheduler wired with a manual clock and a quiet background loop
/// (huge tick interval), so tests drive ticks explicitly.
pub fn manual_scheduler(
    clock: Arc<ManualClock>,
    store: Arc<dyn JobStore>,
    executor: JobExecutor,
) -> Arc<CronScheduler> {
    Arc::new(
        CronScheduler::new(store, Arc::new(executor))
            .with_clock(clock)
            .with_tick_interval(Duration::from_secs(3600)),
    )
}

/// An executor with no agent and an empty channel registry.
pub fn bare_executor() -> JobExecutor {
    JobExecutor::new(Arc::new(ChannelRegistry::new()))
}

pub fn system_event_draft(name: &str, schedule: Schedule) -> JobDraft {
    JobDraft {
        name: name.into(),
        schedule,
        payload: Payload::SystemEvent {
            message: "hello".into(),
        },
        enabled: None,
        delete_after_run: false,
    }
}

/// Poll storage until the job reaches the expected run count.
///
/// More reliable than fixed sleeps since executions complete on spawned
/// tasks. Panics on timeout.
pub async fn wait_for_run_count(
    scheduler: &CronScheduler,
    id: &JobId,
    expected: u64,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(job) = scheduler.get(id).await {
            if job.state.run_count >= expected {
                return;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for run {expected} of job {id}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give spawned executions a moment, then assert nothing fired.
pub async fn assert_no_run(scheduler: &CronScheduler, id: &JobId, expected: u64) {
    tokio::time::sleep(Duration::from_millis(30)).await;
    let job = scheduler.get(id).await.expect("job exists");
    assert_eq!(job.state.run_count, expected, "unexpected run count");
}
