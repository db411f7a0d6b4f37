use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("Insufficient shares: need at least {required}, but only {provided} provided")]
    InsufficientShares { required: usize, provided: usize },

    #[error("Mismatched shares: {reason}")]
    MismatchedShares { reason: String },

    #[error("Invalid field modulus: {reason}")]
    InvalidModulus { reason: String },

    #[error("Invalid threshold: {threshold} (must be between {min} and {max})")]
    InvalidThreshold { threshold: usize, min: usize, max: usize },

    #[error("Invalid share count: {count} (must be between {min} and {max})")]
    InvalidShareCount { count: usize, min: usize, max: usize },

    #[error("Share count mismatch: {shares} shares for {key_holders} key holders")]
    ShareCountMismatch { shares: usize, key_holders: usize },

    #[error("Secret too large: {size} bytes (max: {max})")]
    SecretTooLarge { size: usize, max: usize },

    #[error("Invalid share encoding: {0}")]
    Encoding(String),

    #[error("Backup group not found: {group_id}")]
    GroupNotFound { group_id: String },

    #[error("Recovery request not found: {request_id}")]
    RequestNotFound { request_id: String },

    #[error("Recovery request expired: {request_id}")]
    RequestExpired { request_id: String },

    #[error("Recovery request {request_id} is not completed")]
    RequestNotCompleted { request_id: String },

    #[error("Identity {identity} is not a key holder for recovery request {request_id}")]
    UnknownResponder { request_id: String, identity: String },

    #[error("Approval from {identity} for recovery request {request_id} carries no share")]
    MissingShare { request_id: String, identity: String },

    #[error("Denial from {identity} for recovery request {request_id} must not carry a share")]
    UnexpectedShare { request_id: String, identity: String },

    #[error("Approval from {identity} for completed recovery request {request_id} cannot be changed")]
    ApprovalLocked { request_id: String, identity: String },

    #[error("No share held for group {group_id}")]
    ShareNotHeld { group_id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeeperError {
    /// Validation failures are raised before any side effect and are never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            KeeperError::InsufficientShares { .. }
                | KeeperError::MismatchedShares { .. }
                | KeeperError::InvalidModulus { .. }
                | KeeperError::InvalidThreshold { .. }
                | KeeperError::InvalidShareCount { .. }
                | KeeperError::ShareCountMismatch { .. }
                | KeeperError::SecretTooLarge { .. }
                | KeeperError::Encoding(_)
                | KeeperError::UnknownResponder { .. }
                | KeeperError::MissingShare { .. }
                | KeeperError::UnexpectedShare { .. }
                | KeeperError::ApprovalLocked { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            KeeperError::RequestNotFound { .. } | KeeperError::GroupNotFound { .. }
        )
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            KeeperError::InsufficientShares { .. } => "insufficient_shares",
            KeeperError::MismatchedShares { .. } => "mismatched_shares",
            KeeperError::InvalidModulus { .. } => "invalid_modulus",
            KeeperError::InvalidThreshold { .. } => "invalid_threshold",
            KeeperError::InvalidShareCount { .. } => "invalid_share_count",
            KeeperError::ShareCountMismatch { .. } => "share_count_mismatch",
            KeeperError::SecretTooLarge { .. } => "secret_too_large",
            KeeperError::Encoding(_) => "encoding",
            KeeperError::GroupNotFound { .. } => "group_not_found",
            KeeperError::RequestNotFound { .. } => "request_not_found",
            KeeperError::RequestExpired { .. } => "request_expired",
            KeeperError::RequestNotCompleted { .. } => "request_not_completed",
            KeeperError::UnknownResponder { .. } => "unknown_responder",
            KeeperError::MissingShare { .. } => "missing_share",
            KeeperError::UnexpectedShare { .. } => "unexpected_share",
            KeeperError::ApprovalLocked { .. } => "approval_locked",
            KeeperError::ShareNotHeld { .. } => "share_not_held",
            KeeperError::Storage(_) => "storage",
            KeeperError::Serialization(_) => "serialization",
            KeeperError::Transport(_) => "transport",
            KeeperError::Configuration(_) => "configuration",
            KeeperError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, KeeperError>;
