// src/storage/memory.rs - In-memory storage implementation

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::group::BackupGroup;
use crate::recovery::RecoveryRequest;
use crate::share::Share;

use super::{received_share_key, Storage};

/// In-memory storage implementation using DashMap for thread-safe operations
#[derive(Clone)]
pub struct MemoryStorage {
    groups: Arc<DashMap<String, BackupGroup>>,
    requests: Arc<DashMap<String, RecoveryRequest>>,
    received: Arc<DashMap<(String, String), Share>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            groups: Arc::new(DashMap::new()),
            requests: Arc::new(DashMap::new()),
            received: Arc::new(DashMap::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.requests.is_empty() && self.received.is_empty()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put_group(&self, group: &BackupGroup) -> Result<()> {
        self.groups.insert(group.group_id.clone(), group.clone());
        debug!(group_id = %group.group_id, "Stored group in memory storage");
        Ok(())
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<BackupGroup>> {
        Ok(self.groups.get(group_id).map(|entry| entry.clone()))
    }

    async fn list_groups(&self) -> Result<Vec<BackupGroup>> {
        let mut groups: Vec<BackupGroup> = self.groups.iter().map(|e| e.value().clone()).collect();
        groups.sort_by_key(|g| g.created_at);
        Ok(groups)
    }

    async fn put_request(&self, request: &RecoveryRequest) -> Result<()> {
        self.requests.insert(request.id.clone(), request.clone());
        debug!(request_id = %request.id, status = %request.status, "Stored recovery request");
        Ok(())
    }

    async fn get_request(&self, request_id: &str) -> Result<Option<RecoveryRequest>> {
        Ok(self.requests.get(request_id).map(|entry| entry.clone()))
    }

    async fn list_requests(&self, group_id: &str) -> Result<Vec<RecoveryRequest>> {
        let mut requests: Vec<RecoveryRequest> = self
            .requests
            .iter()
            .filter(|entry| entry.value().group_id == group_id)
            .map(|entry| entry.value().clone())
            .collect();
        requests.sort_by_key(|r| r.requested_at);
        Ok(requests)
    }

    async fn put_received_share(&self, share: &Share) -> Result<()> {
        let key = received_share_key(share)?;
        debug!(group_id = %key.0, identity = %key.1, "Stored received share");
        self.received.insert(key, share.clone());
        Ok(())
    }

    async fn get_received_share(&self, group_id: &str, identity: &str) -> Result<Option<Share>> {
        let key = (group_id.to_string(), identity.to_string());
        Ok(self.received.get(&key).map(|entry| entry.clone()))
    }

    async fn list_received_shares(&self, identity: &str) -> Result<Vec<Share>> {
        Ok(self
            .received
            .iter()
            .filter(|entry| entry.key().1 == identity)
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
