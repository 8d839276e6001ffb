//! Scheduler lifecycle events and event handling.
//!
//! The scheduler emits an event for every committed mutation and every
//! realised run. Emission is best-effort: handlers are awaited in
//! registration order and their behaviour never affects the tick loop.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::job::Job;
use crate::executor::ExecutionReport;

/// Events emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum CronEvent {
    /// A job was created.
    JobAdded { job: Job },

    /// A job was mutated through the CRUD API.
    JobUpdated { job: Job },

    /// A job was removed.
    JobRemoved { job: Job },

    /// A job execution completed; `job` reflects the post-run state.
    JobRan {
        job: Job,
        report: ExecutionReport,
    },
}

impl CronEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CronEvent::JobAdded { .. } => "job.added",
            CronEvent::JobUpdated { .. } => "job.updated",
            CronEvent::JobRemoved { .. } => "job.removed",
            CronEvent::JobRan { .. } => "job.ran",
        }
    }

    /// The job the event concerns.
    pub fn job(&self) -> &Job {
        match self {
            CronEvent::JobAdded { job }
            | CronEvent::JobUpdated { job }
            | CronEvent::JobRemoved { job }
            | CronEvent::JobRan { job, .. } => job,
        }
    }
}

/// Handler for receiving scheduler events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &CronEvent);
}

/// Event bus distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: CronEvent) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
