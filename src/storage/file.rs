// src/storage/file.rs - JSON document storage under a data directory

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::group::BackupGroup;
use crate::recovery::RecoveryRequest;
use crate::share::Share;

use super::{received_share_key, Storage};

const GROUPS_DIR: &str = "groups";
const REQUESTS_DIR: &str = "requests";
const SHARES_DIR: &str = "shares";

/// One JSON file per record. Writes go to a temporary file that is renamed
/// into place, so a crash leaves either the old or the new document.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Opens (creating if needed) a storage directory.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [GROUPS_DIR, REQUESTS_DIR, SHARES_DIR] {
            let path = root.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .with_context(|| format!("Failed to create data directory {}", path.display()))?;
        }
        info!("Opened file storage at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, dir: &str, key: &str) -> PathBuf {
        self.root.join(dir).join(format!("{}.json", file_stem(key)))
    }

    async fn write_document<T: Serialize + Sync>(&self, dir: &str, key: &str, value: &T) -> Result<()> {
        let path = self.document_path(dir, key);
        let temp_path = path.with_extension("json.tmp");
        let serialized = serde_json::to_vec_pretty(value)?;

        tokio::fs::write(&temp_path, &serialized)
            .await
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .with_context(|| format!("Failed to move {} into place", path.display()))?;

        debug!("Wrote {}", path.display());
        Ok(())
    }

    async fn read_document<T: DeserializeOwned>(&self, dir: &str, key: &str) -> Result<Option<T>> {
        let path = self.document_path(dir, key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to read {}", path.display()))
                .into()),
        }
    }

    async fn read_all<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>> {
        let path = self.root.join(dir);
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .with_context(|| format!("Failed to list {}", path.display()))?;

        let mut documents = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to list {}", path.display()))?
        {
            let file_path = entry.path();
            if file_path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read(&file_path)
                .await
                .with_context(|| format!("Failed to read {}", file_path.display()))?;
            match serde_json::from_slice(&data) {
                Ok(document) => documents.push(document),
                Err(e) => warn!("Skipping unreadable document {}: {}", file_path.display(), e),
            }
        }
        Ok(documents)
    }
}

/// Hex-encodes a record key so identities and ids are always safe file names.
fn file_stem(key: &str) -> String {
    key.bytes().map(|b| format!("{:02x}", b)).collect()
}

fn share_key(group_id: &str, identity: &str) -> String {
    format!("{}\n{}", group_id, identity)
}

#[async_trait]
impl Storage for FileStorage {
    async fn put_group(&self, group: &BackupGroup) -> Result<()> {
        self.write_document(GROUPS_DIR, &group.group_id, group).await
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<BackupGroup>> {
        self.read_document(GROUPS_DIR, group_id).await
    }

    async fn list_groups(&self) -> Result<Vec<BackupGroup>> {
        let mut groups: Vec<BackupGroup> = self.read_all(GROUPS_DIR).await?;
        groups.sort_by_key(|g| g.created_at);
        Ok(groups)
    }

    async fn put_request(&self, request: &RecoveryRequest) -> Result<()> {
        self.write_document(REQUESTS_DIR, &request.id, request).await
    }

    async fn get_request(&self, request_id: &str) -> Result<Option<RecoveryRequest>> {
        self.read_document(REQUESTS_DIR, request_id).await
    }

    async fn list_requests(&self, group_id: &str) -> Result<Vec<RecoveryRequest>> {
        let mut requests: Vec<RecoveryRequest> = self
            .read_all::<RecoveryRequest>(REQUESTS_DIR)
            .await?
            .into_iter()
            .filter(|r| r.group_id == group_id)
            .collect();
        requests.sort_by_key(|r| r.requested_at);
        Ok(requests)
    }

    async fn put_received_share(&self, share: &Share) -> Result<()> {
        let (group_id, identity) = received_share_key(share)?;
        self.write_document(SHARES_DIR, &share_key(&group_id, &identity), share)
            .await
    }

    async fn get_received_share(&self, group_id: &str, identity: &str) -> Result<Option<Share>> {
        self.read_document(SHARES_DIR, &share_key(group_id, identity))
            .await
    }

    async fn list_received_shares(&self, identity: &str) -> Result<Vec<Share>> {
        Ok(self
            .read_all::<Share>(SHARES_DIR)
            .await?
            .into_iter()
            .filter(|s| s.recipient_identity.as_deref() == Some(identity))
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
