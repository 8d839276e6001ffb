//! Channel contract and registry.
//!
//! Channel adapters (DingTalk, Feishu, QQ, WeCom, and the embedded web
//! chat) live outside this crate; they implement [`Channel`] and are
//! registered at process start. The registry treats channels as opaque:
//! a send failure is reported in the receipt, never raised.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// The closed set of recognised channel ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelId {
    Dingtalk,
    Feishu,
    Qq,
    Wecom,
    Webchat,
}

impl ChannelId {
    pub const ALL: [ChannelId; 5] = [
        ChannelId::Dingtalk,
        ChannelId::Feishu,
        ChannelId::Qq,
        ChannelId::Wecom,
        ChannelId::Webchat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelId::Dingtalk => "dingtalk",
            ChannelId::Feishu => "feishu",
            ChannelId::Qq => "qq",
            ChannelId::Wecom => "wecom",
            ChannelId::Webchat => "webchat",
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a string that names no recognised channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for ChannelId {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dingtalk" => Ok(ChannelId::Dingtalk),
            "feishu" => Ok(ChannelId::Feishu),
            "qq" => Ok(ChannelId::Qq),
            "wecom" => Ok(ChannelId::Wecom),
            "webchat" => Ok(ChannelId::Webchat),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

/// A channel reference in a job payload: either a concrete id or the
/// `last` sentinel, which the executor resolves to the configured default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSelector {
    Id(ChannelId),
    Last,
}

impl ChannelSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelSelector::Id(id) => id.as_str(),
            ChannelSelector::Last => "last",
        }
    }

    /// Resolve `last` against the configured default.
    pub fn resolve(self, default: Option<ChannelId>) -> Option<ChannelId> {
        match self {
            ChannelSelector::Id(id) => Some(id),
            ChannelSelector::Last => default,
        }
    }
}

impl From<ChannelId> for ChannelSelector {
    fn from(id: ChannelId) -> Self {
        ChannelSelector::Id(id)
    }
}

impl fmt::Display for ChannelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelSelector {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "last" {
            Ok(ChannelSelector::Last)
        } else {
            s.parse::<ChannelId>().map(ChannelSelector::Id)
        }
    }
}

impl Serialize for ChannelSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChannelSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// An outbound message handed to a channel adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub chat_id: String,
    pub content: String,
    pub reply_to_id: Option<String>,
    pub media_urls: Vec<String>,
}

impl ChannelMessage {
    /// Plain text message to a chat.
    pub fn text(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to_id: None,
            media_urls: Vec::new(),
        }
    }
}

/// What a channel reports back for one send attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendReceipt {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl SendReceipt {
    pub fn delivered(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// A registered IM channel. Implementations handle the platform wire
/// protocol and use interior mutability for any connection state.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Which of the recognised channel ids this adapter serves.
    fn id(&self) -> ChannelId;

    /// Whether the channel is currently able to send.
    fn is_available(&self) -> bool {
        true
    }

    /// Send one message. Failures are reported in the receipt.
    async fn send_message(&self, message: ChannelMessage) -> SendReceipt;
}

/// Lookup of channel handlers by id.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<ChannelId, Arc<dyn Channel>>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register a channel. Replaces any existing channel with the same id.
    pub async fn register(&self, channel: Arc<dyn Channel>) {
        let id = channel.id();
        info!(channel = %id, "Registering channel");
        self.channels.write().await.insert(id, channel);
    }

    /// Unregister a channel by id.
    pub async fn unregister(&self, id: ChannelId) -> bool {
        self.channels.write().await.remove(&id).is_some()
    }

    /// Look up a channel by id.
    pub async fn get(&self, id: ChannelId) -> Option<Arc<dyn Channel>> {
        self.channels.read().await.get(&id).cloned()
    }

    /// Whether a channel is registered and reports itself available.
    pub async fn is_available(&self, id: ChannelId) -> bool {
        self.channels
            .read()
            .await
            .get(&id)
            .is_some_and(|ch| ch.is_available())
    }

    /// All registered channels.
    pub async fn list(&self) -> Vec<Arc<dyn Channel>> {
        self.channels.read().await.values().cloned().collect()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
