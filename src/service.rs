use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::Config;
use crate::distribution::{DistributionRecord, ShareDistributor};
use crate::error::{KeeperError, Result};
use crate::group::BackupGroup;
use crate::messaging::{Messenger, OutboundMessage, RecoveryResponseMessage, ShareEnvelope, Tag};
use crate::metrics::Metrics;
use crate::recovery::{
    InboundHandler, RecoveryCoordinator, RecoveryRequest, RecoveryStatus, RecoveryStatusView,
};
use crate::share::{Share, ShareMetadata};
use crate::sharing::SecretSharingEngine;
use crate::storage::{create_storage, Storage};

/// Result of backing up one secret
#[derive(Debug, Clone)]
pub struct BackupReceipt {
    pub group_id: String,
    pub records: Vec<DistributionRecord>,
    /// Kept only so failed deliveries can be retried; discard once every record is published.
    pub shares: Vec<Share>,
}

impl BackupReceipt {
    pub fn failed(&self) -> impl Iterator<Item = &DistributionRecord> {
        self.records.iter().filter(|r| !r.is_published())
    }

    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Owner and key-holder flows over one identity's messenger and storage.
#[derive(Clone)]
pub struct VaultService {
    config: Config,
    engine: SecretSharingEngine,
    storage: Arc<dyn Storage>,
    messenger: Arc<dyn Messenger>,
    distributor: ShareDistributor,
    coordinator: Arc<RecoveryCoordinator>,
    handler: Arc<InboundHandler>,
    metrics: Arc<Metrics>,
    start_time: Instant,
}

impl VaultService {
    pub async fn new(config: Config, messenger: Arc<dyn Messenger>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| KeeperError::Configuration(e.to_string()))?;
        let storage = create_storage(&config).await?;
        Self::with_storage(config, storage, messenger)
    }

    pub fn with_storage(
        config: Config,
        storage: Arc<dyn Storage>,
        messenger: Arc<dyn Messenger>,
    ) -> Result<Self> {
        let metrics = Arc::new(
            Metrics::from_config(&config.metrics).map_err(|e| KeeperError::Internal(e.to_string()))?,
        );
        let engine = SecretSharingEngine::new(&config.sharing);
        let distributor =
            ShareDistributor::new(messenger.clone(), metrics.clone(), &config.distribution);
        let coordinator = Arc::new(RecoveryCoordinator::new(
            storage.clone(),
            messenger.clone(),
            metrics.clone(),
            &config,
        ));
        let handler = Arc::new(InboundHandler::new(
            messenger.clone(),
            coordinator.clone(),
            storage.clone(),
            metrics.clone(),
            config.recovery.max_parked_responses,
            config.recovery.max_parked_requests,
        ));

        info!(
            identity = %messenger.identity(),
            storage = storage.backend_name(),
            "Vault service ready"
        );

        Ok(Self {
            config,
            engine,
            storage,
            messenger,
            distributor,
            coordinator,
            handler,
            metrics,
            start_time: Instant::now(),
        })
    }

    pub fn identity(&self) -> &str {
        self.messenger.identity()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn coordinator(&self) -> &Arc<RecoveryCoordinator> {
        &self.coordinator
    }

    pub fn inbound_handler(&self) -> &Arc<InboundHandler> {
        &self.handler
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Splits `secret` for `group` and delivers one share to each key holder.
    pub async fn backup_secret(&self, group: &BackupGroup, secret: &[u8]) -> Result<BackupReceipt> {
        let split_config = group.split_config()?;
        let metadata = ShareMetadata {
            creator_identity: self.identity().to_string(),
            group_id: group.group_id.clone(),
            group_label: group.label.clone(),
            peers: group.identities(),
        };

        let shares = self.engine.split_with(secret, split_config, &metadata)?;
        self.metrics.split_performed();
        self.storage.put_group(group).await?;

        let records = self
            .distributor
            .distribute(self.identity(), group, &shares)
            .await?;

        info!(
            group_id = %group.group_id,
            threshold = group.threshold,
            total_keys = group.total_keys,
            published = records.iter().filter(|r| r.is_published()).count(),
            "Backed up secret"
        );

        Ok(BackupReceipt {
            group_id: group.group_id.clone(),
            records,
            shares,
        })
    }

    /// Re-sends the failed deliveries of a backup.
    pub async fn retry_failed(&self, receipt: &BackupReceipt) -> Result<BackupReceipt> {
        let group = self.load_group(&receipt.group_id).await?;
        let records = self
            .distributor
            .redistribute_failed(self.identity(), &group, &receipt.shares, &receipt.records)
            .await?;
        Ok(BackupReceipt {
            group_id: receipt.group_id.clone(),
            records,
            shares: receipt.shares.clone(),
        })
    }

    /// Asks the key holders of a stored group to return their shares.
    pub async fn initiate_recovery(
        &self,
        group_id: &str,
        expiration: Option<Duration>,
    ) -> Result<RecoveryRequest> {
        let group = self.load_group(group_id).await?;
        self.coordinator
            .initiate(
                group_id,
                self.identity(),
                &group.identities(),
                group.threshold,
                expiration,
            )
            .await
    }

    /// Key-holder flow: answer a recovery request with this identity's share,
    /// or a denial, and send the answer to the initiator.
    pub async fn answer_recovery(&self, request_id: &str, approved: bool) -> Result<RecoveryRequest> {
        let request = self.coordinator.get_request(request_id).await?.ok_or_else(|| {
            KeeperError::RequestNotFound {
                request_id: request_id.to_string(),
            }
        })?;

        let share = if approved {
            let share = self
                .storage
                .get_received_share(&request.group_id, self.identity())
                .await?
                .ok_or_else(|| KeeperError::ShareNotHeld {
                    group_id: request.group_id.clone(),
                })?;
            Some(share)
        } else {
            None
        };

        let updated = self
            .coordinator
            .respond(request_id, self.identity(), approved, share.clone())
            .await?;
        let responded_at = updated
            .responses
            .get(self.identity())
            .and_then(|r| r.responded_at)
            .unwrap_or_else(chrono::Utc::now);

        let message = OutboundMessage::new(RecoveryResponseMessage {
            request_id: request.id.clone(),
            group_id: request.group_id.clone(),
            responder_identity: self.identity().to_string(),
            approved,
            responded_at,
            share: share.as_ref().map(ShareEnvelope::from),
        });
        let relays = self.coordinator.relays_for(&request.group_id).await?;
        let tags = [
            Tag::Group(request.group_id.clone()),
            Tag::Expiration(request.expires_at),
        ];

        let report = self
            .messenger
            .encrypt_and_send(&message, &request.initiator_identity, &relays, &tags)
            .await?;
        if !report.is_published() {
            warn!(
                request_id = %request_id,
                initiator = %request.initiator_identity,
                "No relay accepted recovery response"
            );
            return Err(KeeperError::Transport(report.failure_summary()));
        }

        info!(
            request_id = %request_id,
            approved = approved,
            "Answered recovery request"
        );
        Ok(updated)
    }

    /// Rebuilds the secret from the approved shares of a completed request.
    pub async fn reconstruct(&self, request_id: &str) -> Result<Zeroizing<Vec<u8>>> {
        let request = self.coordinator.get_request(request_id).await?.ok_or_else(|| {
            KeeperError::RequestNotFound {
                request_id: request_id.to_string(),
            }
        })?;
        if request.status != RecoveryStatus::Completed {
            return Err(KeeperError::RequestNotCompleted {
                request_id: request_id.to_string(),
            });
        }

        match self.engine.combine(&request.approved_shares()) {
            Ok(secret) => {
                self.metrics.combine_succeeded();
                info!(request_id = %request_id, group_id = %request.group_id, "Reconstructed secret");
                Ok(secret)
            }
            Err(e) => {
                self.metrics.combine_failed(e.kind());
                warn!(request_id = %request_id, error = %e, "Reconstruction failed");
                Err(e)
            }
        }
    }

    pub async fn recovery_status(&self, group_id: &str) -> Result<RecoveryStatusView> {
        self.coordinator.status(group_id, self.identity()).await
    }

    /// Starts consuming inbound shares, requests and responses.
    pub async fn start_inbound(&self) -> Result<JoinHandle<()>> {
        self.handler.clone().start().await
    }

    async fn load_group(&self, group_id: &str) -> Result<BackupGroup> {
        self.storage
            .get_group(group_id)
            .await?
            .ok_or_else(|| KeeperError::GroupNotFound {
                group_id: group_id.to_string(),
            })
    }
}
