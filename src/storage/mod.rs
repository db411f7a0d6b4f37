// src/storage/mod.rs - Storage trait and factory

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{KeeperError, Result};
use crate::group::BackupGroup;
use crate::recovery::RecoveryRequest;
use crate::share::Share;

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Persistence boundary for groups, recovery requests and received shares
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or replace a backup group
    async fn put_group(&self, group: &BackupGroup) -> Result<()>;

    async fn get_group(&self, group_id: &str) -> Result<Option<BackupGroup>>;

    async fn list_groups(&self) -> Result<Vec<BackupGroup>>;

    /// Insert or replace a recovery request, keyed by its id
    async fn put_request(&self, request: &RecoveryRequest) -> Result<()>;

    async fn get_request(&self, request_id: &str) -> Result<Option<RecoveryRequest>>;

    /// All requests for a group, oldest first
    async fn list_requests(&self, group_id: &str) -> Result<Vec<RecoveryRequest>>;

    /// Store a share received by a key holder; keyed by group and recipient identity
    async fn put_received_share(&self, share: &Share) -> Result<()>;

    async fn get_received_share(&self, group_id: &str, identity: &str) -> Result<Option<Share>>;

    async fn list_received_shares(&self, identity: &str) -> Result<Vec<Share>>;

    /// Backend name for logs and summaries
    fn backend_name(&self) -> &'static str;
}

/// Key under which a received share is stored.
pub(crate) fn received_share_key(share: &Share) -> Result<(String, String)> {
    let identity = share.recipient_identity.clone().ok_or_else(|| {
        KeeperError::Internal(format!(
            "received share for group {} has no recipient identity",
            share.group_id
        ))
    })?;
    Ok((share.group_id.clone(), identity))
}

/// Factory function to create storage implementations based on configuration
pub async fn create_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    match config.storage.backend.as_str() {
        "memory" => {
            tracing::info!("Creating memory storage backend");
            Ok(Arc::new(MemoryStorage::new()))
        }
        "file" => {
            let data_directory = config.storage.data_directory.as_ref().ok_or_else(|| {
                KeeperError::Configuration(
                    "Data directory required for file backend".to_string(),
                )
            })?;
            tracing::info!("Creating file storage backend at {}", data_directory);
            Ok(Arc::new(FileStorage::open(data_directory).await?))
        }
        backend => Err(KeeperError::Configuration(format!(
            "Unknown storage backend: {}",
            backend
        ))),
    }
}
