//! Crash recovery and persistence round-trips through the file store.

use std::sync::Arc;
use std::time::Duration;

use mozi_cron::testing::ManualClock;
use mozi_cron::{
    FileStore, Job, JobId, JobState, JobStore, Payload, RunStatus, Schedule, SchedulerError,
    StoreError,
};
use tempfile::TempDir;

use crate::common::{
    assert_no_run, bare_executor, manual_scheduler, system_event_draft, wait_for_run_count, MINUTE,
    START,
};

fn stale_every_job() -> Job {
    Job {
        id: JobId::new("j-stale"),
        name: "survivor".into(),
        enabled: true,
        schedule: Schedule::Every { every_ms: MINUTE },
        payload: Payload::SystemEvent {
            message: "tick".into(),
        },
        delete_after_run: false,
        created_at_ms: START - 300_000,
        updated_at_ms: START - 300_000,
        state: JobState {
            last_run_at_ms: Some(START - 200_000),
            next_run_at_ms: Some(START - 140_000),
            run_count: 7,
            last_status: Some(RunStatus::Ok),
            last_error: None,
        },
    }
}

#[tokio::test]
async fn restart_applies_forward_progress_and_fires_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.json");

    // A snapshot written before a 200s outage.
    FileStore::new(&path).save(&[stale_every_job()]).await.unwrap();

    let clock = Arc::new(ManualClock::new(START));
    let scheduler = manual_scheduler(
        clock.clone(),
        Arc::new(FileStore::new(&path)),
        bare_executor(),
    );
    scheduler.start().await.unwrap();

    let id = JobId::new("j-stale");
    let job = scheduler.get(&id).await.unwrap();
    let next = job.state.next_run_at_ms.unwrap();
    assert!(next > START && next <= START + MINUTE);
    assert_eq!(next, START + 40_000);
    assert_eq!(job.state.run_count, 7);

    // Exactly one fire happens within the next interval.
    clock.set(next);
    scheduler.tick().await;
    wait_for_run_count(&scheduler, &id, 8, Duration::from_secs(2)).await;

    clock.set(next + MINUTE - 1);
    scheduler.tick().await;
    assert_no_run(&scheduler, &id, 8).await;

    clock.set(next + MINUTE);
    scheduler.tick().await;
    wait_for_run_count(&scheduler, &id, 9, Duration::from_secs(2)).await;

    scheduler.stop().await;
}

#[tokio::test]
async fn job_set_round_trips_through_the_file_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.json");

    let clock = Arc::new(ManualClock::new(START));
    let scheduler = manual_scheduler(
        clock.clone(),
        Arc::new(FileStore::new(&path)),
        bare_executor(),
    );

    let every = scheduler
        .add(system_event_draft(
            "periodic",
            Schedule::Every { every_ms: MINUTE },
        ))
        .await
        .unwrap();
    scheduler
        .add(system_event_draft(
            "daily",
            Schedule::Cron {
                expr: "0 9 * * *".into(),
                tz: Some("Asia/Shanghai".into()),
            },
        ))
        .await
        .unwrap();

    // Run one job so state fields are populated.
    clock.set(START + MINUTE);
    scheduler.tick().await;
    wait_for_run_count(&scheduler, &every.id, 1, Duration::from_secs(2)).await;

    let in_memory = scheduler.list(true).await;
    let reloaded = FileStore::new(&path).load().await.unwrap();
    assert_eq!(reloaded, in_memory);
}

#[tokio::test]
async fn corrupt_store_refuses_to_start() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.json");
    std::fs::write(&path, "definitely not json").unwrap();

    let clock = Arc::new(ManualClock::new(START));
    let scheduler = manual_scheduler(clock, Arc::new(FileStore::new(&path)), bare_executor());

    let err = scheduler.start().await.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Store(StoreError::Corrupt(_))
    ));
}

#[tokio::test]
async fn backup_survives_the_last_overwrite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.json");
    let store = FileStore::new(&path);

    store.save(&[stale_every_job()]).await.unwrap();
    let before = std::fs::read_to_string(&path).unwrap();

    store.save(&[]).await.unwrap();
    let backup = std::fs::read_to_string(dir.path().join("jobs.json.bak")).unwrap();
    assert_eq!(backup, before);
    assert!(store.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_at_instant_is_dropped_on_recovery() {
    // A one-shot whose moment passed during the outage does not fire late.
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.json");
    let missed = Job {
        id: JobId::new("j-missed"),
        name: "missed".into(),
        enabled: true,
        schedule: Schedule::At {
            at_ms: START - 10_000,
        },
        payload: Payload::SystemEvent {
            message: "too late".into(),
        },
        delete_after_run: false,
        created_at_ms: START - 20_000,
        updated_at_ms: START - 20_000,
        state: JobState {
            next_run_at_ms: Some(START - 10_000),
            ..JobState::default()
        },
    };
    FileStore::new(&path).save(&[missed]).await.unwrap();

    let clock = Arc::new(ManualClock::new(START));
    let scheduler = manual_scheduler(
        clock.clone(),
        Arc::new(FileStore::new(&path)),
        bare_executor(),
    );
    scheduler.start().await.unwrap();

    let job = scheduler.get(&JobId::new("j-missed")).await.unwrap();
    assert_eq!(job.state.next_run_at_ms, None);

    clock.set(START + MINUTE);
    scheduler.tick().await;
    assert_no_run(&scheduler, &JobId::new("j-missed"), 0).await;

    scheduler.stop().await;
}
