use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messaging::ShareEnvelope;

/// Metadata stamped onto every share of one split.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ShareMetadata {
    pub creator_identity: String,
    pub group_id: String,
    pub group_label: String,
    pub peers: Vec<String>,
}

/// One point of a split secret plus everything needed to validate it at combine time.
///
/// `value` and `field_modulus` are lowercase hex encodings of field elements.
/// The recipient fields are only filled in on the key holder's copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Share {
    pub value: String,
    pub threshold: usize,
    pub total_shares: usize,
    pub index: usize,
    pub field_modulus: String,
    pub creator_identity: String,
    pub created_at: DateTime<Utc>,
    pub group_id: String,
    pub group_label: String,
    pub peers: Vec<String>,
    pub recipient_identity: Option<String>,
    pub received: bool,
    pub received_at: Option<DateTime<Utc>>,
    pub distribution_event_id: Option<String>,
}

impl Share {
    /// Rebuilds the key holder's copy of a share from a delivered envelope.
    pub fn from_envelope(
        envelope: &ShareEnvelope,
        recipient_identity: &str,
        distribution_event_id: Option<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            value: envelope.value.clone(),
            threshold: envelope.threshold,
            total_shares: envelope.total_shares,
            index: envelope.share_index,
            field_modulus: envelope.field_modulus.clone(),
            creator_identity: envelope.creator_identity.clone(),
            created_at: received_at,
            group_id: envelope.group_id.clone(),
            group_label: envelope.group_label.clone(),
            peers: Vec::new(),
            recipient_identity: Some(recipient_identity.to_string()),
            received: true,
            received_at: Some(received_at),
            distribution_event_id,
        }
    }

    /// The parameters every share of one split must agree on.
    pub fn parameters(&self) -> (usize, usize, &str) {
        (self.threshold, self.total_shares, &self.field_modulus)
    }

    pub fn belongs_to(&self, group_id: &str) -> bool {
        self.group_id == group_id
    }
}
