//! Test doubles for exercising the scheduler.
//!
//! - [`ManualClock`]: deterministic clock the tests advance by hand
//! - [`ScriptedChannel`]: records sends and replays scripted receipts
//! - [`StubAgent`]: fixed or scripted agent-turn outcomes
//! - [`FailingStore`]: in-memory store with injectable save failures
//! - [`RecordingHandler`]: captures emitted scheduler events

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::channel::{Channel, ChannelId, ChannelMessage, SendReceipt};
use crate::core::clock::Clock;
use crate::core::job::Job;
use crate::events::{CronEvent, EventHandler};
use crate::executor::{AgentError, AgentRunner, AgentTurnOutcome, AgentTurnRequest};
use crate::storage::{InMemoryStore, JobStore, StoreError};

/// A clock that only moves when told to.
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute instant.
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// A channel that records every message and replays scripted receipts.
/// Once the script is exhausted, sends succeed with generated message ids.
pub struct ScriptedChannel {
    id: ChannelId,
    available: AtomicBool,
    counter: AtomicU64,
    receipts: Mutex<VecDeque<SendReceipt>>,
    sent: Mutex<Vec<ChannelMessage>>,
}

impl ScriptedChannel {
    pub fn new(id: ChannelId) -> Arc<Self> {
        Arc::new(Self {
            id,
            available: AtomicBool::new(true),
            counter: AtomicU64::new(0),
            receipts: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Queue a receipt for the next send.
    pub async fn push_receipt(&self, receipt: SendReceipt) {
        self.receipts.lock().await.push_back(receipt);
    }

    /// Flip the availability probe.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// All messages sent so far, in order.
    pub async fn sent(&self) -> Vec<ChannelMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn send_message(&self, message: ChannelMessage) -> SendReceipt {
        self.sent.lock().await.push(message);
        if let Some(receipt) = self.receipts.lock().await.pop_front() {
            return receipt;
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        SendReceipt::delivered(format!("m-{n}"))
    }
}

/// An agent runner returning a fixed outcome, recording every request.
pub struct StubAgent {
    result: Result<AgentTurnOutcome, AgentError>,
    requests: Mutex<Vec<AgentTurnRequest>>,
}

impl StubAgent {
    /// Agent that succeeds with the given output.
    pub fn ok(output: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(AgentTurnOutcome::ok(output)),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Agent whose turn completes but reports failure.
    pub fn failing(error: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(AgentTurnOutcome::failed("", error)),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Agent whose callback itself errors.
    pub fn erroring(error: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            result: Err(AgentError(error.into())),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<AgentTurnRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl AgentRunner for StubAgent {
    async fn run_turn(&self, request: AgentTurnRequest) -> Result<AgentTurnOutcome, AgentError> {
        self.requests.lock().await.push(request);
        self.result.clone()
    }
}

/// An in-memory store whose next saves can be made to fail.
pub struct FailingStore {
    inner: InMemoryStore,
    fail_saves: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Fail every save until [`FailingStore::heal`] is called.
    pub fn fail_next_save(&self) {
        self.fail_saves.store(true, Ordering::SeqCst);
    }

    /// Let saves succeed again.
    pub fn heal(&self) {
        self.fail_saves.store(false, Ordering::SeqCst);
    }
}

impl Default for FailingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for FailingStore {
    async fn load(&self) -> Result<Vec<Job>, StoreError> {
        self.inner.load().await
    }

    async fn save(&self, jobs: &[Job]) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other(
                "injected save failure",
            )));
        }
        self.inner.save(jobs).await
    }
}

/// Event handler that records everything it sees.
pub struct RecordingHandler {
    events: Mutex<Vec<CronEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    /// Events received so far, in emission order.
    pub async fn events(&self) -> Vec<CronEvent> {
        self.events.lock().await.clone()
    }

    /// Event kinds received so far.
    pub async fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(|e| e.kind()).collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &CronEvent) {
        self.events.lock().await.push(event.clone());
    }
}
