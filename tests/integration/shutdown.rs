//! Single-flight and graceful shutdown behaviour.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mozi_cron::testing::ManualClock;
use mozi_cron::{
    AgentError, AgentRunner, AgentTurnOutcome, AgentTurnRequest, ChannelRegistry, CronScheduler,
    InMemoryStore, JobDraft, JobExecutor, Payload, Schedule,
};

use crate::common::{wait_for_run_count, MINUTE, START};

/// An agent that takes a while, so executions overlap with ticks.
struct SlowAgent {
    delay: Duration,
    calls: AtomicU64,
}

impl SlowAgent {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl AgentRunner for SlowAgent {
    async fn run_turn(&self, _request: AgentTurnRequest) -> Result<AgentTurnOutcome, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(AgentTurnOutcome::ok("slow and steady"))
    }
}

fn slow_scheduler(
    clock: Arc<ManualClock>,
    agent: Arc<SlowAgent>,
) -> Arc<CronScheduler> {
    let executor =
        JobExecutor::new(Arc::new(ChannelRegistry::new())).with_agent(agent);
    Arc::new(
        CronScheduler::new(Arc::new(InMemoryStore::new()), Arc::new(executor))
            .with_clock(clock)
            .with_tick_interval(Duration::from_secs(3600))
            .with_shutdown_grace(Duration::from_secs(5)),
    )
}

fn slow_draft(name: &str) -> JobDraft {
    JobDraft {
        name: name.into(),
        schedule: Schedule::Every { every_ms: MINUTE },
        payload: Payload::AgentTurn {
            message: "take your time".into(),
            model: None,
            timeout_seconds: None,
            deliver: false,
            channel: None,
            to: None,
        },
        enabled: None,
        delete_after_run: false,
    }
}

#[tokio::test]
async fn overlapping_ticks_start_at_most_one_execution() {
    let clock = Arc::new(ManualClock::new(START));
    let agent = SlowAgent::new(Duration::from_millis(150));
    let scheduler = slow_scheduler(clock.clone(), agent.clone());

    let job = scheduler.add(slow_draft("slow")).await.unwrap();

    clock.set(START + MINUTE);
    scheduler.tick().await;
    // The first execution is still sleeping; more ticks must not stack up.
    scheduler.tick().await;
    scheduler.tick().await;

    wait_for_run_count(&scheduler, &job.id, 1, Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.get(&job.id).await.unwrap().state.run_count, 1);
}

#[tokio::test]
async fn next_fire_is_computed_from_completion() {
    let clock = Arc::new(ManualClock::new(START));
    let agent = SlowAgent::new(Duration::from_millis(50));
    let scheduler = slow_scheduler(clock.clone(), agent);

    let job = scheduler.add(slow_draft("slow")).await.unwrap();

    clock.set(START + MINUTE);
    scheduler.tick().await;
    // Completion happens while the clock reads START + 90s.
    clock.set(START + MINUTE + 30_000);
    wait_for_run_count(&scheduler, &job.id, 1, Duration::from_secs(2)).await;

    let after = scheduler.get(&job.id).await.unwrap();
    // The missed window is dropped; next fire is one interval past completion.
    assert_eq!(
        after.state.next_run_at_ms,
        Some(START + MINUTE + 30_000 + MINUTE)
    );
}

#[tokio::test]
async fn manual_run_is_rejected_while_in_flight() {
    let clock = Arc::new(ManualClock::new(START));
    let agent = SlowAgent::new(Duration::from_millis(200));
    let scheduler = slow_scheduler(clock.clone(), agent);

    let job = scheduler.add(slow_draft("busy")).await.unwrap();

    clock.set(START + MINUTE);
    scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = scheduler.run(&job.id).await.unwrap_err();
    assert!(matches!(err, mozi_cron::SchedulerError::JobBusy(_)));

    wait_for_run_count(&scheduler, &job.id, 1, Duration::from_secs(2)).await;
}

#[tokio::test]
async fn stop_waits_for_in_flight_executions() {
    let clock = Arc::new(ManualClock::new(START));
    let agent = SlowAgent::new(Duration::from_millis(150));
    let scheduler = slow_scheduler(clock.clone(), agent.clone());

    scheduler.start().await.unwrap();
    let job = scheduler.add(slow_draft("draining")).await.unwrap();

    clock.set(START + MINUTE);
    scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(scheduler.status().await.in_flight, 1);

    scheduler.stop().await;

    // The execution finished before stop returned.
    assert_eq!(scheduler.status().await.in_flight, 0);
    assert_eq!(scheduler.get(&job.id).await.unwrap().state.run_count, 1);
}

#[tokio::test]
async fn two_jobs_execute_concurrently() {
    let clock = Arc::new(ManualClock::new(START));
    let agent = SlowAgent::new(Duration::from_millis(100));
    let scheduler = slow_scheduler(clock.clone(), agent.clone());

    let a = scheduler.add(slow_draft("a")).await.unwrap();
    let b = scheduler.add(slow_draft("b")).await.unwrap();

    clock.set(START + MINUTE);
    let started = tokio::time::Instant::now();
    scheduler.tick().await;
    wait_for_run_count(&scheduler, &a.id, 1, Duration::from_secs(2)).await;
    wait_for_run_count(&scheduler, &b.id, 1, Duration::from_secs(2)).await;

    // Two 100ms executions overlapped rather than running back to back.
    assert!(started.elapsed() < Duration::from_millis(190));
    assert_eq!(agent.calls.load(Ordering::SeqCst), 2);
}
