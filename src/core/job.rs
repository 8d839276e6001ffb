//! Persistent job model: schedules, payloads, and run state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::ChannelSelector;

use super::types::{JobId, RunStatus};

/// Bounds on `timeoutSeconds` for agent-turn payloads.
pub const MIN_TIMEOUT_SECONDS: u64 = 1;
pub const MAX_TIMEOUT_SECONDS: u64 = 600;

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Schedule {
    /// Single shot at an absolute wall-clock instant.
    #[serde(rename_all = "camelCase")]
    At { at_ms: i64 },
    /// Fixed interval; the first fire is one interval after creation.
    #[serde(rename_all = "camelCase")]
    Every { every_ms: i64 },
    /// 5- or 6-field cron expression, evaluated in `tz` when present
    /// (process-local zone otherwise).
    Cron {
        expr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
}

/// What a job does when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Payload {
    /// Opaque event; execution only logs.
    SystemEvent { message: String },
    /// Full model turn, optionally delivered to a channel.
    #[serde(rename_all = "camelCase")]
    AgentTurn {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u64>,
        #[serde(default)]
        deliver: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<ChannelSelector>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },
}

/// Validation failures for a job payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// `deliver = true` requires both a channel and a recipient.
    #[error("deliver=true requires both channel and to")]
    MissingDeliveryTarget,

    /// `timeoutSeconds` outside the permitted bounds.
    #[error("timeoutSeconds must be between 1 and 600, got {0}")]
    TimeoutOutOfRange(u64),
}

impl Payload {
    /// Check the invariants a payload must satisfy at creation/update time.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if let Payload::AgentTurn {
            timeout_seconds,
            deliver,
            channel,
            to,
            ..
        } = self
        {
            if let Some(timeout) = timeout_seconds {
                if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(timeout) {
                    return Err(PayloadError::TimeoutOutOfRange(*timeout));
                }
            }
            if *deliver && (channel.is_none() || to.is_none()) {
                return Err(PayloadError::MissingDeliveryTarget);
            }
        }
        Ok(())
    }
}

/// Mutable run bookkeeping for a job. Only last-run metadata survives;
/// agent output text is never persisted here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A scheduled job, the persistent root entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub enabled: bool,
    pub schedule: Schedule,
    pub payload: Payload,
    /// Remove the job entirely after a successful run.
    #[serde(default, skip_serializing_if = "is_false")]
    pub delete_after_run: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    #[serde(default)]
    pub state: JobState,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Input for creating a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDraft {
    pub name: String,
    pub schedule: Schedule,
    pub payload: Payload,
    /// Defaults to enabled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub delete_after_run: bool,
}

/// Partial update for an existing job. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after_run: Option<bool>,
}
