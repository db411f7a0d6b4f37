// src/recovery/status.rs - Read-only recovery status projection

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::request::{RecoveryRequest, RecoveryStatus};

/// What one identity sees about recovery for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryStatusView {
    pub group_id: String,
    pub identity: String,
    /// A request is still collecting responses
    pub has_active_recovery: bool,
    /// The current request has enough approvals to reconstruct
    pub can_recover: bool,
    pub active_recovery_request: Option<RecoveryRequest>,
    pub is_initiator: bool,
}

impl RecoveryStatusView {
    /// Projects `requests` for `group_id` as seen by `identity` at `now`.
    ///
    /// The current request is the most recently requested one that is either
    /// still open or completed. A completed request stays current until a newer
    /// request supersedes it.
    pub fn project(
        requests: &[RecoveryRequest],
        group_id: &str,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let is_open = |r: &RecoveryRequest| !r.status.is_terminal() && !r.is_past_deadline(now);

        let has_active_recovery = requests
            .iter()
            .any(|r| r.group_id == group_id && is_open(r));

        let current = requests
            .iter()
            .filter(|r| r.group_id == group_id)
            .filter(|r| r.status == RecoveryStatus::Completed || is_open(r))
            .max_by_key(|r| r.requested_at)
            .cloned();

        let can_recover = current
            .as_ref()
            .map(|r| r.approved_count() >= r.threshold)
            .unwrap_or(false);
        let is_initiator = current
            .as_ref()
            .map(|r| r.initiator_identity == identity)
            .unwrap_or(false);

        Self {
            group_id: group_id.to_string(),
            identity: identity.to_string(),
            has_active_recovery,
            can_recover,
            active_recovery_request: current,
            is_initiator,
        }
    }
}
