// src/distribution.rs - Fan shares out to key holders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::DistributionConfig;
use crate::error::{KeeperError, Result};
use crate::group::BackupGroup;
use crate::messaging::{Messenger, OutboundMessage, ShareEnvelope, Tag};
use crate::metrics::Metrics;
use crate::share::Share;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    Published,
    Failed,
}

/// Outcome of delivering one share to one key holder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistributionRecord {
    pub event_id: String,
    pub recipient_identity: String,
    pub group_id: String,
    pub share_index: usize,
    pub created_at: DateTime<Utc>,
    pub status: DistributionStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

impl DistributionRecord {
    pub fn is_published(&self) -> bool {
        self.status == DistributionStatus::Published
    }
}

/// One pending delivery: a share, who gets it, and the event id it is published under.
struct Delivery {
    event_id: String,
    recipient: String,
    share: Share,
}

#[derive(Clone)]
pub struct ShareDistributor {
    messenger: Arc<dyn Messenger>,
    metrics: Arc<Metrics>,
    default_relays: Vec<String>,
    share_expiration: Option<Duration>,
    max_attempts: u32,
    retry_delay: Duration,
    max_concurrent_sends: usize,
}

impl ShareDistributor {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        metrics: Arc<Metrics>,
        config: &DistributionConfig,
    ) -> Self {
        Self {
            messenger,
            metrics,
            default_relays: config.default_relays.clone(),
            share_expiration: config.share_expiration_seconds.map(Duration::from_secs),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_concurrent_sends: config.max_concurrent_sends.max(1),
        }
    }

    /// Publishes share `i` to key holder `i` of `group`.
    ///
    /// Counts are checked before anything is sent. Per-recipient failures are
    /// reported as failed records, never as an error of the whole call.
    pub async fn distribute(
        &self,
        owner_identity: &str,
        group: &BackupGroup,
        shares: &[Share],
    ) -> Result<Vec<DistributionRecord>> {
        let deliveries = self.pair_shares(group, shares)?;
        let relays = self.relays_for(group)?;

        info!(
            group_id = %group.group_id,
            owner = %owner_identity,
            recipients = deliveries.len(),
            relays = relays.len(),
            "Distributing shares"
        );

        let timer = self.metrics.distribution_started();
        let records = self.publish_all(group, deliveries, relays).await;
        timer.observe_duration();

        let failed = records.iter().filter(|r| !r.is_published()).count();
        if failed > 0 {
            warn!(
                group_id = %group.group_id,
                failed = failed,
                total = records.len(),
                "Some shares could not be delivered"
            );
        } else {
            info!(group_id = %group.group_id, "All shares delivered");
        }

        Ok(records)
    }

    /// Retries only the failed records, publishing under their original event ids.
    ///
    /// Returns the full record set with the failed entries replaced.
    pub async fn redistribute_failed(
        &self,
        owner_identity: &str,
        group: &BackupGroup,
        shares: &[Share],
        records: &[DistributionRecord],
    ) -> Result<Vec<DistributionRecord>> {
        let relays = self.relays_for(group)?;

        let mut retries = Vec::new();
        for record in records.iter().filter(|r| !r.is_published()) {
            let share = shares
                .iter()
                .find(|s| s.index == record.share_index && s.belongs_to(&record.group_id))
                .ok_or_else(|| KeeperError::MismatchedShares {
                    reason: format!(
                        "no share with index {} for group {}",
                        record.share_index, record.group_id
                    ),
                })?;
            retries.push(Delivery {
                event_id: record.event_id.clone(),
                recipient: record.recipient_identity.clone(),
                share: share.clone(),
            });
        }

        if retries.is_empty() {
            debug!(group_id = %group.group_id, "Nothing to redistribute");
            return Ok(records.to_vec());
        }

        info!(
            group_id = %group.group_id,
            owner = %owner_identity,
            recipients = retries.len(),
            "Redistributing failed shares"
        );

        let retried = self.publish_all(group, retries, relays).await;
        Ok(records
            .iter()
            .map(|record| {
                retried
                    .iter()
                    .find(|r| r.event_id == record.event_id)
                    .cloned()
                    .unwrap_or_else(|| record.clone())
            })
            .collect())
    }

    fn pair_shares(&self, group: &BackupGroup, shares: &[Share]) -> Result<Vec<Delivery>> {
        let key_holders = group.key_holders.len();
        if shares.len() != key_holders || group.total_keys != key_holders {
            return Err(KeeperError::ShareCountMismatch {
                shares: shares.len(),
                key_holders,
            });
        }

        let mut ordered: Vec<&Share> = shares.iter().collect();
        ordered.sort_by_key(|s| s.index);

        ordered
            .into_iter()
            .zip(group.key_holders.iter())
            .enumerate()
            .map(|(position, (share, holder))| {
                if share.index != position || !share.belongs_to(&group.group_id) {
                    return Err(KeeperError::MismatchedShares {
                        reason: format!(
                            "share {} does not fit position {} of group {}",
                            share.index, position, group.group_id
                        ),
                    });
                }
                Ok(Delivery {
                    event_id: uuid::Uuid::new_v4().to_string(),
                    recipient: holder.identity.clone(),
                    share: share.clone(),
                })
            })
            .collect()
    }

    fn relays_for(&self, group: &BackupGroup) -> Result<Vec<String>> {
        let relays = if group.relays.is_empty() {
            self.default_relays.clone()
        } else {
            group.relays.clone()
        };
        if relays.is_empty() {
            return Err(KeeperError::Configuration(format!(
                "group {} has no relays and no default relays are configured",
                group.group_id
            )));
        }
        Ok(relays)
    }

    fn tags_for(&self, group: &BackupGroup) -> Vec<Tag> {
        let mut tags = vec![Tag::Group(group.group_id.clone())];
        if let Some(expiration) = self.share_expiration {
            if let Ok(expiration) = chrono::Duration::from_std(expiration) {
                tags.push(Tag::Expiration(Utc::now() + expiration));
            }
        }
        tags
    }

    async fn publish_all(
        &self,
        group: &BackupGroup,
        deliveries: Vec<Delivery>,
        relays: Vec<String>,
    ) -> Vec<DistributionRecord> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_sends));
        let relays = Arc::new(relays);
        let tags = Arc::new(self.tags_for(group));

        let mut handles = Vec::new();
        for delivery in deliveries {
            let distributor = self.clone();
            let semaphore = semaphore.clone();
            let relays = relays.clone();
            let tags = tags.clone();
            let recipient = delivery.recipient.clone();
            let share_index = delivery.share.index;
            let event_id = delivery.event_id.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return distributor.record(&delivery, 0, Some(e.to_string()));
                    }
                };
                distributor.publish_one(&delivery, &relays, &tags).await
            });

            handles.push((handle, recipient, share_index, event_id));
        }

        let mut records = Vec::with_capacity(handles.len());
        for (handle, recipient, share_index, event_id) in handles {
            match handle.await {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!(recipient = %recipient, "Share delivery task panicked: {}", e);
                    self.metrics.share_failed(1);
                    records.push(DistributionRecord {
                        event_id,
                        recipient_identity: recipient,
                        group_id: group.group_id.clone(),
                        share_index,
                        created_at: Utc::now(),
                        status: DistributionStatus::Failed,
                        attempts: 1,
                        error: Some(format!("Task panicked: {}", e)),
                    });
                }
            }
        }

        records
    }

    async fn publish_one(
        &self,
        delivery: &Delivery,
        relays: &[String],
        tags: &[Tag],
    ) -> DistributionRecord {
        let message = OutboundMessage::with_event_id(
            delivery.event_id.clone(),
            ShareEnvelope::from(&delivery.share),
        );

        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            let outcome = self
                .messenger
                .encrypt_and_send(&message, &delivery.recipient, relays, tags)
                .await;

            match outcome {
                Ok(report) if report.is_published() => {
                    debug!(
                        recipient = %delivery.recipient,
                        event_id = %delivery.event_id,
                        attempt = attempt,
                        accepted = report.accepted_relays(),
                        "Share published"
                    );
                    self.metrics.share_published(attempt);
                    return self.record(delivery, attempt, None);
                }
                Ok(report) => last_error = Some(report.failure_summary()),
                Err(e) => last_error = Some(e.to_string()),
            }

            warn!(
                recipient = %delivery.recipient,
                event_id = %delivery.event_id,
                attempt = attempt,
                max_attempts = self.max_attempts,
                error = last_error.as_deref().unwrap_or("unknown"),
                "Share publish attempt failed"
            );

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        self.metrics.share_failed(self.max_attempts);
        self.record(delivery, self.max_attempts, last_error)
    }

    /// Linear backoff plus up to half a step of jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let step = u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX);
        let jitter = if step > 1 { fastrand::u64(0..step / 2) } else { 0 };
        Duration::from_millis(step.saturating_mul(u64::from(attempt)).saturating_add(jitter))
    }

    fn record(&self, delivery: &Delivery, attempts: u32, error: Option<String>) -> DistributionRecord {
        DistributionRecord {
            event_id: delivery.event_id.clone(),
            recipient_identity: delivery.recipient.clone(),
            group_id: delivery.share.group_id.clone(),
            share_index: delivery.share.index,
            created_at: Utc::now(),
            status: if error.is_none() {
                DistributionStatus::Published
            } else {
                DistributionStatus::Failed
            },
            attempts,
            error,
        }
    }
}
