use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KeeperError, Result};
use crate::sharing::SplitConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyHolder {
    pub identity: String,
    pub display_name: String,
}

impl KeyHolder {
    pub fn new(identity: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            display_name: display_name.into(),
        }
    }
}

/// The owner-authored description of who holds which share and where to reach them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupGroup {
    pub group_id: String,
    pub label: String,
    pub threshold: usize,
    pub total_keys: usize,
    pub key_holders: Vec<KeyHolder>,
    pub relays: Vec<String>,
    pub instructions: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BackupGroup {
    pub fn new(
        label: impl Into<String>,
        threshold: usize,
        key_holders: Vec<KeyHolder>,
        relays: Vec<String>,
    ) -> Self {
        Self {
            group_id: Uuid::new_v4().to_string(),
            label: label.into(),
            threshold,
            total_keys: key_holders.len(),
            key_holders,
            relays,
            instructions: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn identities(&self) -> Vec<String> {
        self.key_holders.iter().map(|h| h.identity.clone()).collect()
    }

    pub fn is_key_holder(&self, identity: &str) -> bool {
        self.key_holders.iter().any(|h| h.identity == identity)
    }

    /// Checks the group is internally consistent and returns the split it implies.
    pub fn split_config(&self) -> Result<SplitConfig> {
        if self.total_keys != self.key_holders.len() {
            return Err(KeeperError::ShareCountMismatch {
                shares: self.total_keys,
                key_holders: self.key_holders.len(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for holder in &self.key_holders {
            if !seen.insert(holder.identity.as_str()) {
                return Err(KeeperError::Configuration(format!(
                    "Key holder {} appears more than once in group {}",
                    holder.identity, self.group_id
                )));
            }
        }

        SplitConfig::from_counts(self.threshold, self.total_keys)
    }
}
