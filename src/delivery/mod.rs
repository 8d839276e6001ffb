//! Outbound delivery fabric.
//!
//! Takes a target plus an ordered list of payloads and dispatches them
//! through the channel registry, one at a time. Best-effort mode records
//! per-payload failures and keeps going; strict mode stops at the first
//! failure. A fired cancellation token lets the in-flight send finish,
//! appends a single synthetic `Aborted` result, and returns.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::channel::{ChannelId, ChannelMessage, ChannelRegistry};

/// Error string recorded on the synthetic result appended after an abort.
pub const ABORTED: &str = "Aborted";

/// Errors raised by strict (non-best-effort) delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// No channel registered under the target id.
    #[error("channel not registered: {0}")]
    ChannelNotFound(ChannelId),

    /// The channel reported a failed send.
    #[error("delivery failed on {channel}: {error}")]
    SendFailed { channel: ChannelId, error: String },

    /// Delivery was cancelled before the send could be attempted.
    #[error("delivery aborted")]
    Aborted,
}

/// Where a delivery goes. The serialised form is `"channel:to"`; the `to`
/// portion may itself contain colons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub channel: ChannelId,
    pub to: String,
    pub account_id: Option<String>,
}

impl DeliveryTarget {
    pub fn new(channel: ChannelId, to: impl Into<String>) -> Self {
        Self {
            channel,
            to: to.into(),
            account_id: None,
        }
    }
}

/// One message to deliver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

impl DeliveryPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// The outcome of one attempted payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub success: bool,
    pub channel: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl DeliveryResult {
    fn delivered(channel: ChannelId, message_id: Option<String>) -> Self {
        Self {
            success: true,
            channel,
            message_id,
            error: None,
            error_details: None,
        }
    }

    fn failed(channel: ChannelId, error: impl Into<String>) -> Self {
        Self {
            success: false,
            channel,
            message_id: None,
            error: Some(error.into()),
            error_details: None,
        }
    }

    fn aborted(channel: ChannelId) -> Self {
        Self::failed(channel, ABORTED)
    }
}

/// Options for a delivery call.
#[derive(Debug, Clone, Default)]
pub struct DeliverOptions {
    /// Keep going past per-payload failures instead of stopping.
    pub best_effort: bool,
    /// Cooperative abort; checked before each payload.
    pub cancel: Option<CancellationToken>,
}

impl DeliverOptions {
    pub fn best_effort() -> Self {
        Self {
            best_effort: true,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A complete outbound request: target, payload list, and options.
#[derive(Debug, Clone)]
pub struct OutboundDelivery {
    pub channel: ChannelId,
    pub to: String,
    pub payloads: Vec<DeliveryPayload>,
    pub best_effort: bool,
    pub cancel: Option<CancellationToken>,
}

/// Dispatches payloads to channels via the registry.
pub struct DeliveryService {
    registry: Arc<ChannelRegistry>,
}

impl DeliveryService {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self { registry }
    }

    /// Parse a raw `"channel:to"` target. A bare `to` uses the fallback
    /// channel; the `last` sentinel yields `None` (the caller must resolve
    /// it against its own context).
    pub fn parse_target(raw: &str, fallback: Option<ChannelId>) -> Option<DeliveryTarget> {
        if raw.is_empty() {
            return None;
        }
        if let Some((prefix, rest)) = raw.split_once(':') {
            if prefix == "last" {
                return None;
            }
            if let Ok(channel) = prefix.parse::<ChannelId>() {
                if rest.is_empty() {
                    return None;
                }
                return Some(DeliveryTarget::new(channel, rest));
            }
        }
        fallback.map(|channel| DeliveryTarget::new(channel, raw))
    }

    /// Deliver a single payload.
    pub async fn deliver_one(
        &self,
        target: &DeliveryTarget,
        payload: &DeliveryPayload,
        options: &DeliverOptions,
    ) -> Result<DeliveryResult, DeliveryError> {
        if is_cancelled(options) {
            if options.best_effort {
                return Ok(DeliveryResult::aborted(target.channel));
            }
            return Err(DeliveryError::Aborted);
        }
        let mut results = self
            .deliver_many(target, std::slice::from_ref(payload), options)
            .await?;
        Ok(results.pop().expect("one payload yields one result"))
    }

    /// Deliver payloads in order. Results index-correspond to attempted
    /// payloads; a shorter result list means delivery stopped early.
    pub async fn deliver_many(
        &self,
        target: &DeliveryTarget,
        payloads: &[DeliveryPayload],
        options: &DeliverOptions,
    ) -> Result<Vec<DeliveryResult>, DeliveryError> {
        let mut results = Vec::with_capacity(payloads.len());

        for payload in payloads {
            if is_cancelled(options) {
                warn!(channel = %target.channel, "Delivery aborted mid-batch");
                results.push(DeliveryResult::aborted(target.channel));
                return Ok(results);
            }

            let Some(channel) = self.registry.get(target.channel).await else {
                if options.best_effort {
                    warn!(channel = %target.channel, "Channel not registered, recording failure");
                    results.push(DeliveryResult::failed(
                        target.channel,
                        format!("channel not registered: {}", target.channel),
                    ));
                    continue;
                }
                return Err(DeliveryError::ChannelNotFound(target.channel));
            };

            let message = ChannelMessage {
                chat_id: target.to.clone(),
                content: payload.text.clone(),
                reply_to_id: payload.reply_to_id.clone(),
                media_urls: payload.media_urls.clone(),
            };
            let receipt = channel.send_message(message).await;

            if receipt.success {
                results.push(DeliveryResult::delivered(target.channel, receipt.message_id));
            } else {
                let error = receipt.error.unwrap_or_else(|| "send failed".to_string());
                if options.best_effort {
                    warn!(channel = %target.channel, error = %error, "Send failed, continuing");
                    results.push(DeliveryResult::failed(target.channel, error));
                } else {
                    return Err(DeliveryError::SendFailed {
                        channel: target.channel,
                        error,
                    });
                }
            }
        }

        Ok(results)
    }

    /// Deliver a full outbound request. An empty payload list is a no-op.
    pub async fn deliver_outbound(
        &self,
        request: OutboundDelivery,
    ) -> Result<Vec<DeliveryResult>, DeliveryError> {
        if request.payloads.is_empty() {
            return Ok(Vec::new());
        }
        let target = DeliveryTarget::new(request.channel, request.to);
        let options = DeliverOptions {
            best_effort: request.best_effort,
            cancel: request.cancel,
        };
        self.deliver_many(&target, &request.payloads, &options).await
    }
}

fn is_cancelled(options: &DeliverOptions) -> bool {
    options.cancel.as_ref().is_some_and(|c| c.is_cancelled())
}
