// src/messaging/mod.rs - Messaging capability consumed by distribution and recovery

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod memory;
pub mod message;

pub use memory::{Delivery, MemoryMessenger, MemoryRelayNetwork};
pub use message::{
    Envelope, MessageKind, RecoveryMessage, RecoveryRequestMessage, RecoveryResponseMessage,
    ShareEnvelope,
};

/// Relay tags attached to a published event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Tag {
    /// Group the payload belongs to
    Group(String),
    /// Relays may drop the event after this instant
    Expiration(DateTime<Utc>),
}

impl Tag {
    pub fn name(&self) -> &'static str {
        match self {
            Tag::Group(_) => "d",
            Tag::Expiration(_) => "expiration",
        }
    }

    pub fn value(&self) -> String {
        match self {
            Tag::Group(group_id) => group_id.clone(),
            Tag::Expiration(at) => at.timestamp().to_string(),
        }
    }
}

/// A payload ready for publishing; the event id is fixed by the sender so
/// retries of the same delivery can be deduplicated by relays.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub event_id: String,
    pub envelope: Envelope,
}

impl OutboundMessage {
    pub fn new(envelope: impl Into<Envelope>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            envelope: envelope.into(),
        }
    }

    pub fn with_event_id(event_id: impl Into<String>, envelope: impl Into<Envelope>) -> Self {
        Self {
            event_id: event_id.into(),
            envelope: envelope.into(),
        }
    }
}

/// A decoded message addressed to the local identity
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub event_id: String,
    pub sender: String,
    pub envelope: Envelope,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub relay: String,
    pub accepted: bool,
    pub error: Option<String>,
}

/// Per-relay result of one publish
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub event_id: String,
    pub outcomes: Vec<RelayOutcome>,
}

impl PublishReport {
    /// A publish counts once any relay accepted it.
    pub fn is_published(&self) -> bool {
        self.outcomes.iter().any(|o| o.accepted)
    }

    pub fn accepted_relays(&self) -> usize {
        self.outcomes.iter().filter(|o| o.accepted).count()
    }

    pub fn failure_summary(&self) -> String {
        self.outcomes
            .iter()
            .filter(|o| !o.accepted)
            .map(|o| format!("{}: {}", o.relay, o.error.as_deref().unwrap_or("rejected")))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub type InboundStream = BoxStream<'static, InboundMessage>;

/// Identity-bound messaging: per-recipient encryption plus relay publish and subscribe.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Public identity this messenger sends as and receives for
    fn identity(&self) -> &str;

    /// Encrypt the message for `recipient` and publish it to `relays`
    async fn encrypt_and_send(
        &self,
        message: &OutboundMessage,
        recipient: &str,
        relays: &[String],
        tags: &[Tag],
    ) -> Result<PublishReport>;

    /// Stream of decoded messages of one kind addressed to this identity
    async fn subscribe(&self, kind: MessageKind) -> Result<InboundStream>;
}
