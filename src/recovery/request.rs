// src/recovery/request.rs - Recovery request state machine

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{KeeperError, Result};
use crate::messaging::RecoveryRequestMessage;
use crate::share::Share;

/// Aggregate state of a recovery request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    /// No key holder has answered yet
    Pending,
    /// At least one answer, threshold not met
    InProgress,
    /// Enough approvals to reconstruct
    Completed,
    /// Deadline passed before the threshold was met
    Expired,
}

impl RecoveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryStatus::Completed | RecoveryStatus::Expired)
    }
}

impl std::fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecoveryStatus::Pending => "pending",
            RecoveryStatus::InProgress => "in_progress",
            RecoveryStatus::Completed => "completed",
            RecoveryStatus::Expired => "expired",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Pending,
    Approved,
    Denied,
}

/// One key holder's answer. `share` is present exactly when approved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryResponse {
    pub identity: String,
    pub status: ResponseStatus,
    pub responded_at: Option<DateTime<Utc>>,
    pub share: Option<Share>,
}

impl RecoveryResponse {
    pub fn pending(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            status: ResponseStatus::Pending,
            responded_at: None,
            share: None,
        }
    }

    pub fn approved(identity: impl Into<String>, share: Share, at: DateTime<Utc>) -> Self {
        Self {
            identity: identity.into(),
            status: ResponseStatus::Approved,
            responded_at: Some(at),
            share: Some(share),
        }
    }

    pub fn denied(identity: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            identity: identity.into(),
            status: ResponseStatus::Denied,
            responded_at: Some(at),
            share: None,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == ResponseStatus::Approved
    }

    /// Both are approvals carrying the same share point.
    fn same_approval(&self, other: &RecoveryResponse) -> bool {
        match (&self.share, &other.share) {
            (Some(mine), Some(theirs)) => {
                self.is_approved()
                    && other.is_approved()
                    && mine.index == theirs.index
                    && mine.value == theirs.value
                    && mine.field_modulus == theirs.field_modulus
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryRequest {
    pub id: String,
    pub group_id: String,
    pub initiator_identity: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub threshold: usize,
    pub status: RecoveryStatus,
    pub responses: BTreeMap<String, RecoveryResponse>,
}

impl RecoveryRequest {
    /// Opens a request with one pending response per key holder.
    pub fn new(
        group_id: impl Into<String>,
        initiator_identity: impl Into<String>,
        key_holders: &[String],
        threshold: usize,
        expiration: Duration,
    ) -> Self {
        let requested_at = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            group_id: group_id.into(),
            initiator_identity: initiator_identity.into(),
            requested_at,
            expires_at: requested_at + expiration,
            threshold,
            status: RecoveryStatus::Pending,
            responses: key_holders
                .iter()
                .map(|identity| (identity.clone(), RecoveryResponse::pending(identity.clone())))
                .collect(),
        }
    }

    /// Local copy of a request announced by its initiator.
    pub fn from_message(message: &RecoveryRequestMessage, key_holders: &[String]) -> Self {
        Self {
            id: message.request_id.clone(),
            group_id: message.group_id.clone(),
            initiator_identity: message.initiator_identity.clone(),
            requested_at: message.requested_at,
            expires_at: message.expires_at,
            threshold: message.threshold,
            status: RecoveryStatus::Pending,
            responses: key_holders
                .iter()
                .map(|identity| (identity.clone(), RecoveryResponse::pending(identity.clone())))
                .collect(),
        }
    }

    pub fn to_message(&self) -> RecoveryRequestMessage {
        RecoveryRequestMessage {
            request_id: self.id.clone(),
            group_id: self.group_id.clone(),
            initiator_identity: self.initiator_identity.clone(),
            requested_at: self.requested_at,
            expires_at: self.expires_at,
            threshold: self.threshold,
            key_holders: self.key_holders(),
        }
    }

    pub fn key_holders(&self) -> Vec<String> {
        self.responses.keys().cloned().collect()
    }

    pub fn is_key_holder(&self, identity: &str) -> bool {
        self.responses.contains_key(identity)
    }

    pub fn approved_count(&self) -> usize {
        self.responses.values().filter(|r| r.is_approved()).count()
    }

    pub fn denied_count(&self) -> usize {
        self.responses
            .values()
            .filter(|r| r.status == ResponseStatus::Denied)
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.responses
            .values()
            .filter(|r| r.status == ResponseStatus::Pending)
            .count()
    }

    pub fn approved_shares(&self) -> Vec<Share> {
        self.responses
            .values()
            .filter(|r| r.is_approved())
            .filter_map(|r| r.share.clone())
            .collect()
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Moves an unfinished request past its deadline to `Expired`.
    /// Returns true when the status changed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if !self.status.is_terminal() && self.is_past_deadline(now) {
            self.status = RecoveryStatus::Expired;
            return true;
        }
        false
    }

    /// Records one key holder's answer and recomputes the aggregate status.
    ///
    /// A later answer from the same holder replaces the earlier one. Once
    /// completed the request stays completed and its approvals are frozen:
    /// an approver may only repeat the same share.
    pub fn apply_response(&mut self, response: RecoveryResponse, now: DateTime<Utc>) -> Result<()> {
        self.expire_if_due(now);
        if self.status == RecoveryStatus::Expired || self.is_past_deadline(now) {
            return Err(KeeperError::RequestExpired {
                request_id: self.id.clone(),
            });
        }

        if !self.is_key_holder(&response.identity) {
            return Err(KeeperError::UnknownResponder {
                request_id: self.id.clone(),
                identity: response.identity,
            });
        }

        match (response.status, response.share.as_ref()) {
            (ResponseStatus::Approved, None) => {
                return Err(KeeperError::MissingShare {
                    request_id: self.id.clone(),
                    identity: response.identity,
                })
            }
            (ResponseStatus::Denied, Some(_)) | (ResponseStatus::Pending, Some(_)) => {
                return Err(KeeperError::UnexpectedShare {
                    request_id: self.id.clone(),
                    identity: response.identity,
                })
            }
            (ResponseStatus::Approved, Some(share)) if !share.belongs_to(&self.group_id) => {
                return Err(KeeperError::MismatchedShares {
                    reason: format!(
                        "share from {} belongs to group {}, not {}",
                        response.identity, share.group_id, self.group_id
                    ),
                })
            }
            _ => {}
        }

        if self.status == RecoveryStatus::Completed {
            if let Some(existing) = self.responses.get(&response.identity) {
                if existing.status == ResponseStatus::Approved && !existing.same_approval(&response) {
                    return Err(KeeperError::ApprovalLocked {
                        request_id: self.id.clone(),
                        identity: response.identity,
                    });
                }
            }
        }

        self.responses.insert(response.identity.clone(), response);
        self.recompute_status();
        Ok(())
    }

    fn recompute_status(&mut self) {
        if self.status == RecoveryStatus::Completed {
            return;
        }
        self.status = if self.approved_count() >= self.threshold {
            RecoveryStatus::Completed
        } else if self.pending_count() < self.responses.len() {
            RecoveryStatus::InProgress
        } else {
            RecoveryStatus::Pending
        };
    }
}
