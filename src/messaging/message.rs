// src/messaging/message.rs - Wire payloads exchanged over relays

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::share::Share;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Share,
    RecoveryRequest,
    RecoveryResponse,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::Share => "share",
            MessageKind::RecoveryRequest => "recovery_request",
            MessageKind::RecoveryResponse => "recovery_response",
        };
        f.write_str(name)
    }
}

/// Share payload delivered to one key holder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShareEnvelope {
    pub value: String,
    pub threshold: usize,
    pub share_index: usize,
    pub total_shares: usize,
    pub field_modulus: String,
    pub creator_identity: String,
    pub group_id: String,
    pub group_label: String,
}

impl From<&Share> for ShareEnvelope {
    fn from(share: &Share) -> Self {
        Self {
            value: share.value.clone(),
            threshold: share.threshold,
            share_index: share.index,
            total_shares: share.total_shares,
            field_modulus: share.field_modulus.clone(),
            creator_identity: share.creator_identity.clone(),
            group_id: share.group_id.clone(),
            group_label: share.group_label.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRequestMessage {
    pub request_id: String,
    pub group_id: String,
    pub initiator_identity: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub threshold: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_holders: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResponseMessage {
    pub request_id: String,
    pub group_id: String,
    pub responder_identity: String,
    pub approved: bool,
    pub responded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share: Option<ShareEnvelope>,
}

/// Recovery protocol messages, tagged on the wire by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryMessage {
    RecoveryRequest(RecoveryRequestMessage),
    RecoveryResponse(RecoveryResponseMessage),
}

/// Anything a messenger carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Share(ShareEnvelope),
    Recovery(RecoveryMessage),
}

impl Envelope {
    pub fn kind(&self) -> MessageKind {
        match self {
            Envelope::Share(_) => MessageKind::Share,
            Envelope::Recovery(RecoveryMessage::RecoveryRequest(_)) => MessageKind::RecoveryRequest,
            Envelope::Recovery(RecoveryMessage::RecoveryResponse(_)) => {
                MessageKind::RecoveryResponse
            }
        }
    }

    pub fn group_id(&self) -> &str {
        match self {
            Envelope::Share(share) => &share.group_id,
            Envelope::Recovery(RecoveryMessage::RecoveryRequest(m)) => &m.group_id,
            Envelope::Recovery(RecoveryMessage::RecoveryResponse(m)) => &m.group_id,
        }
    }

    /// Serializes the payload as it travels inside the encrypted envelope.
    pub fn encode(&self) -> Result<String> {
        let json = match self {
            Envelope::Share(share) => serde_json::to_string(share)?,
            Envelope::Recovery(message) => serde_json::to_string(message)?,
        };
        Ok(json)
    }

    pub fn decode(kind: MessageKind, payload: &str) -> Result<Self> {
        let envelope = match kind {
            MessageKind::Share => Envelope::Share(serde_json::from_str(payload)?),
            MessageKind::RecoveryRequest | MessageKind::RecoveryResponse => {
                Envelope::Recovery(serde_json::from_str(payload)?)
            }
        };
        Ok(envelope)
    }
}

impl From<ShareEnvelope> for Envelope {
    fn from(share: ShareEnvelope) -> Self {
        Envelope::Share(share)
    }
}

impl From<RecoveryRequestMessage> for Envelope {
    fn from(message: RecoveryRequestMessage) -> Self {
        Envelope::Recovery(RecoveryMessage::RecoveryRequest(message))
    }
}

impl From<RecoveryResponseMessage> for Envelope {
    fn from(message: RecoveryResponseMessage) -> Self {
        Envelope::Recovery(RecoveryMessage::RecoveryResponse(message))
    }
}
