//! Agent-turn execution and output routing.

use std::sync::Arc;
use std::time::Duration;

use mozi_cron::testing::{ManualClock, ScriptedChannel, StubAgent};
use mozi_cron::{
    ChannelId, ChannelRegistry, ChannelSelector, InMemoryStore, JobDraft, JobExecutor, Payload,
    RunLog, RunStatus, Schedule, SendReceipt,
};
use tempfile::TempDir;

use crate::common::{manual_scheduler, wait_for_run_count, MINUTE, START};

fn agent_turn_draft(name: &str, deliver: bool) -> JobDraft {
    JobDraft {
        name: name.into(),
        schedule: Schedule::Every { every_ms: MINUTE },
        payload: Payload::AgentTurn {
            message: "What's the weather?".into(),
            model: None,
            timeout_seconds: Some(120),
            deliver,
            channel: deliver.then_some(ChannelSelector::Id(ChannelId::Dingtalk)),
            to: deliver.then(|| "u1".to_string()),
        },
        enabled: None,
        delete_after_run: false,
    }
}

#[tokio::test]
async fn agent_output_is_delivered_to_channel() {
    let registry = Arc::new(ChannelRegistry::new());
    let channel = ScriptedChannel::new(ChannelId::Dingtalk);
    channel.push_receipt(SendReceipt::delivered("m-42")).await;
    registry.register(channel.clone()).await;

    let agent = StubAgent::ok("The weather is sunny today!");
    let executor = JobExecutor::new(registry).with_agent(agent.clone());

    let clock = Arc::new(ManualClock::new(START));
    let scheduler = manual_scheduler(clock.clone(), Arc::new(InMemoryStore::new()), executor);

    let job = scheduler.add(agent_turn_draft("weather", true)).await.unwrap();

    clock.set(START + MINUTE);
    scheduler.tick().await;
    wait_for_run_count(&scheduler, &job.id, 1, Duration::from_secs(2)).await;

    let sent = channel.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].chat_id, "u1");
    assert_eq!(sent[0].content, "The weather is sunny today!");

    let requests = agent.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].session_key, format!("cron:{}", job.id));
    assert_eq!(requests[0].timeout_seconds, Some(120));

    let after = scheduler.get(&job.id).await.unwrap();
    assert_eq!(after.state.last_status, Some(RunStatus::Ok));
    assert_eq!(after.state.last_error, None);
}

#[tokio::test]
async fn agent_failure_suppresses_delivery() {
    let registry = Arc::new(ChannelRegistry::new());
    let channel = ScriptedChannel::new(ChannelId::Dingtalk);
    registry.register(channel.clone()).await;

    let agent = StubAgent::failing("Model unavailable");
    let executor = JobExecutor::new(registry).with_agent(agent);

    let clock = Arc::new(ManualClock::new(START));
    let scheduler = manual_scheduler(clock, Arc::new(InMemoryStore::new()), executor);

    let job = scheduler.add(agent_turn_draft("doomed", true)).await.unwrap();
    let report = scheduler.run(&job.id).await.unwrap();

    assert_eq!(report.status, RunStatus::Error);
    assert_eq!(report.error.as_deref(), Some("Model unavailable"));
    assert!(channel.sent().await.is_empty());

    let after = scheduler.get(&job.id).await.unwrap();
    assert_eq!(after.state.last_status, Some(RunStatus::Error));
    assert_eq!(after.state.last_error.as_deref(), Some("Model unavailable"));
    assert_eq!(after.state.run_count, 1);
}

#[tokio::test]
async fn agent_callback_error_is_captured() {
    let agent = StubAgent::erroring("connection reset by peer");
    let executor =
        JobExecutor::new(Arc::new(ChannelRegistry::new())).with_agent(agent);

    let clock = Arc::new(ManualClock::new(START));
    let scheduler = manual_scheduler(clock, Arc::new(InMemoryStore::new()), executor);

    let job = scheduler.add(agent_turn_draft("flaky", false)).await.unwrap();
    let report = scheduler.run(&job.id).await.unwrap();

    assert_eq!(report.status, RunStatus::Error);
    assert_eq!(report.error.as_deref(), Some("connection reset by peer"));

    // A failing job stays scheduled.
    let after = scheduler.get(&job.id).await.unwrap();
    assert!(after.enabled);
    assert!(after.state.next_run_at_ms.is_some());
}

#[tokio::test]
async fn missing_agent_skips_the_turn() {
    let clock = Arc::new(ManualClock::new(START));
    let scheduler = manual_scheduler(
        clock,
        Arc::new(InMemoryStore::new()),
        JobExecutor::new(Arc::new(ChannelRegistry::new())),
    );

    let job = scheduler.add(agent_turn_draft("skipped", false)).await.unwrap();
    let report = scheduler.run(&job.id).await.unwrap();

    assert_eq!(report.status, RunStatus::Skipped);
    assert_eq!(report.summary.as_deref(), Some("No agent executor configured"));
    assert_eq!(
        scheduler.get(&job.id).await.unwrap().state.last_status,
        Some(RunStatus::Skipped)
    );
}

#[tokio::test]
async fn unavailable_channel_does_not_fail_the_run() {
    let registry = Arc::new(ChannelRegistry::new());
    let channel = ScriptedChannel::new(ChannelId::Dingtalk);
    channel.set_available(false);
    registry.register(channel.clone()).await;

    let agent = StubAgent::ok("output nobody hears");
    let executor = JobExecutor::new(registry).with_agent(agent);

    let clock = Arc::new(ManualClock::new(START));
    let scheduler = manual_scheduler(clock, Arc::new(InMemoryStore::new()), executor);

    let job = scheduler.add(agent_turn_draft("quiet", true)).await.unwrap();
    let report = scheduler.run(&job.id).await.unwrap();

    assert_eq!(report.status, RunStatus::Ok);
    assert!(channel.sent().await.is_empty());
}

#[tokio::test]
async fn run_history_records_attempts() {
    let dir = TempDir::new().unwrap();
    let agent = StubAgent::failing("boom");
    let executor =
        JobExecutor::new(Arc::new(ChannelRegistry::new())).with_agent(agent);

    let clock = Arc::new(ManualClock::new(START));
    let scheduler = Arc::new(
        mozi_cron::CronScheduler::new(Arc::new(InMemoryStore::new()), Arc::new(executor))
            .with_clock(clock)
            .with_tick_interval(Duration::from_secs(3600))
            .with_run_log(RunLog::new(dir.path())),
    );

    let job = scheduler.add(agent_turn_draft("logged", false)).await.unwrap();
    scheduler.run(&job.id).await.unwrap();

    let runs = scheduler.runs(&job.id, 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Error);
    assert_eq!(runs[0].error.as_deref(), Some("boom"));
    assert_eq!(runs[0].job_id, job.id);
}
