//! Job execution: dispatch a job's payload and route agent output.
//!
//! The executor is a plain function of the job and the externally supplied
//! callbacks; it holds no reference back to the scheduler. Delivery of
//! agent output is best-effort and never fails an otherwise successful run.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::channel::{ChannelId, ChannelRegistry};
use crate::core::job::{Job, Payload};
use crate::core::types::RunStatus;
use crate::delivery::{DeliveryPayload, DeliveryService, OutboundDelivery};

/// Rendered summaries are capped to this many characters.
pub const SUMMARY_MAX_CHARS: usize = 200;

/// A model turn request handed to the external agent callback.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTurnRequest {
    pub message: String,
    /// Session key of the form `cron:<job-id>`.
    pub session_key: String,
    pub model: Option<String>,
    /// Forwarded verbatim; the callback is responsible for enforcing it.
    pub timeout_seconds: Option<u64>,
}

/// What the agent callback reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTurnOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl AgentTurnOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }
}

/// A failure thrown by the agent callback itself (as opposed to a turn
/// that completed and reported `success = false`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct AgentError(pub String);

impl From<&str> for AgentError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The external model-turn callback, supplied once at construction.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run_turn(&self, request: AgentTurnRequest) -> Result<AgentTurnOutcome, AgentError>;
}

/// Result of executing one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionReport {
    fn ok(summary: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Ok,
            summary: Some(summary.into()),
            output_text: None,
            error: None,
        }
    }

    fn ok_with_output(output: &str) -> Self {
        Self {
            status: RunStatus::Ok,
            summary: Some(truncate_chars(output, SUMMARY_MAX_CHARS)),
            output_text: Some(output.to_string()),
            error: None,
        }
    }

    fn skipped(summary: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Skipped,
            summary: Some(summary.into()),
            output_text: None,
            error: None,
        }
    }

    fn error(error: impl Into<String>, output_text: Option<String>) -> Self {
        Self {
            status: RunStatus::Error,
            summary: None,
            output_text,
            error: Some(error.into()),
        }
    }
}

/// Runs one job's payload and routes any agent output to its channel.
pub struct JobExecutor {
    registry: Arc<ChannelRegistry>,
    delivery: Arc<DeliveryService>,
    agent: Option<Arc<dyn AgentRunner>>,
    default_channel: Option<ChannelId>,
}

impl JobExecutor {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        let delivery = Arc::new(DeliveryService::new(Arc::clone(&registry)));
        Self {
            registry,
            delivery,
            agent: None,
            default_channel: None,
        }
    }

    /// Set the model-turn callback. Without one, agent-turn jobs are skipped.
    pub fn with_agent(mut self, agent: Arc<dyn AgentRunner>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Channel the `last` sentinel resolves to.
    pub fn with_default_channel(mut self, channel: ChannelId) -> Self {
        self.default_channel = Some(channel);
        self
    }

    /// Execute one job. Never panics or errors: every failure mode is
    /// captured in the report.
    pub async fn execute(&self, job: &Job) -> ExecutionReport {
        match &job.payload {
            Payload::SystemEvent { message } => {
                info!(job_id = %job.id, message = %message, "System event fired");
                ExecutionReport::ok("System event executed")
            }
            Payload::AgentTurn {
                message,
                model,
                timeout_seconds,
                deliver,
                channel,
                to,
            } => {
                let Some(agent) = &self.agent else {
                    return ExecutionReport::skipped("No agent executor configured");
                };

                let request = AgentTurnRequest {
                    message: message.clone(),
                    session_key: format!("cron:{}", job.id),
                    model: model.clone(),
                    timeout_seconds: *timeout_seconds,
                };

                let outcome = match agent.run_turn(request).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "Agent callback failed");
                        return ExecutionReport::error(e.to_string(), None);
                    }
                };

                if !outcome.success {
                    let error = outcome
                        .error
                        .unwrap_or_else(|| "agent turn failed".to_string());
                    return ExecutionReport::error(error, Some(outcome.output));
                }

                if *deliver {
                    if let Some(to) = to {
                        self.deliver_output(job, *channel, to, &outcome.output).await;
                    }
                }

                ExecutionReport::ok_with_output(&outcome.output)
            }
        }
    }

    /// Best-effort delivery of agent output; failures are logged only.
    async fn deliver_output(
        &self,
        job: &Job,
        selector: Option<crate::channel::ChannelSelector>,
        to: &str,
        output: &str,
    ) {
        let Some(channel) = selector.and_then(|s| s.resolve(self.default_channel)) else {
            warn!(job_id = %job.id, "No resolvable delivery channel, skipping delivery");
            return;
        };
        if !self.registry.is_available(channel).await {
            warn!(job_id = %job.id, channel = %channel, "Delivery channel unavailable, skipping delivery");
            return;
        }

        let request = OutboundDelivery {
            channel,
            to: to.to_string(),
            payloads: vec![DeliveryPayload::text(output)],
            best_effort: true,
            cancel: None,
        };
        match self.delivery.deliver_outbound(request).await {
            Ok(results) => {
                for result in results.iter().filter(|r| !r.success) {
                    warn!(
                        job_id = %job.id,
                        channel = %channel,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "Delivery of agent output failed"
                    );
                }
            }
            Err(e) => warn!(job_id = %job.id, channel = %channel, error = %e, "Delivery of agent output failed"),
        }
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
