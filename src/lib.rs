pub mod channel;
pub mod core;
pub mod delivery;
pub mod events;
pub mod executor;
pub mod scheduler;
pub mod storage;
pub mod testing;
pub mod tools;

pub use crate::core::clock::{Clock, SystemClock};
pub use crate::core::cron::{CronError, CronExpr};
pub use crate::core::job::{Job, JobDraft, JobPatch, JobState, Payload, PayloadError, Schedule};
pub use crate::core::schedule::{next_run_at_ms, ScheduleError};
pub use crate::core::types::{JobId, RunId, RunStatus};

pub use channel::{
    Channel, ChannelId, ChannelMessage, ChannelRegistry, ChannelSelector, SendReceipt,
    UnknownChannel,
};
pub use delivery::{
    DeliverOptions, DeliveryError, DeliveryPayload, DeliveryResult, DeliveryService,
    DeliveryTarget, OutboundDelivery,
};
pub use events::{CronEvent, EventBus, EventHandler};
pub use executor::{
    AgentError, AgentRunner, AgentTurnOutcome, AgentTurnRequest, ExecutionReport, JobExecutor,
};
pub use scheduler::{CronScheduler, SchedulerError, SchedulerStatus};
pub use storage::{
    FileStore, InMemoryStore, JobStore, RunLog, RunRecord, StoreDocument, StoreError,
};
pub use tools::{ContentBlock, CronTool, ToolDefinition, ToolResult};
