// src/recovery/coordinator.rs - Recovery request lifecycle

use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{KeeperError, Result};
use crate::messaging::{Messenger, OutboundMessage, RecoveryRequestMessage, Tag};
use crate::metrics::Metrics;
use crate::share::Share;
use crate::sharing::Threshold;
use crate::storage::Storage;

use super::request::{RecoveryRequest, RecoveryResponse, RecoveryStatus, ResponseStatus};
use super::status::RecoveryStatusView;

/// Owns recovery requests: creation, responses, lazy expiry.
///
/// Every mutation of one request runs under that request's lock, so
/// concurrent responses are applied one at a time and never lost.
pub struct RecoveryCoordinator {
    storage: Arc<dyn Storage>,
    messenger: Arc<dyn Messenger>,
    metrics: Arc<Metrics>,
    default_relays: Vec<String>,
    default_expiration: Duration,
    max_expiration: Duration,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RecoveryCoordinator {
    pub fn new(
        storage: Arc<dyn Storage>,
        messenger: Arc<dyn Messenger>,
        metrics: Arc<Metrics>,
        config: &Config,
    ) -> Self {
        Self {
            storage,
            messenger,
            metrics,
            default_relays: config.distribution.default_relays.clone(),
            default_expiration: config.recovery_expiration(),
            max_expiration: config.max_recovery_expiration(),
            locks: DashMap::new(),
        }
    }

    async fn lock_request(&self, request_id: &str) -> RequestLock<'_> {
        let lock = self
            .locks
            .entry(request_id.to_string())
            .or_default()
            .clone();
        RequestLock {
            locks: &self.locks,
            request_id: request_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Relays of the stored group, or the configured defaults.
    pub async fn relays_for(&self, group_id: &str) -> Result<Vec<String>> {
        match self.storage.get_group(group_id).await? {
            Some(group) if !group.relays.is_empty() => Ok(group.relays),
            _ => Ok(self.default_relays.clone()),
        }
    }

    /// Opens a recovery request and asks every key holder for their share.
    ///
    /// Messages that no relay accepts are logged and counted; the request is
    /// persisted regardless.
    pub async fn initiate(
        &self,
        group_id: &str,
        initiator_identity: &str,
        key_holders: &[String],
        threshold: usize,
        expiration: Option<Duration>,
    ) -> Result<RecoveryRequest> {
        let distinct: BTreeSet<&String> = key_holders.iter().collect();
        if distinct.len() != key_holders.len() {
            return Err(KeeperError::Configuration(
                "key holders must be distinct".to_string(),
            ));
        }
        let threshold = Threshold::new(threshold)?;
        if *threshold > key_holders.len() {
            return Err(KeeperError::InvalidThreshold {
                threshold: *threshold,
                min: Threshold::MIN,
                max: key_holders.len(),
            });
        }

        let expiration = expiration.unwrap_or(self.default_expiration);
        if expiration.is_zero() || expiration > self.max_expiration {
            return Err(KeeperError::Configuration(format!(
                "recovery expiration must be between 1 and {} seconds",
                self.max_expiration.as_secs()
            )));
        }
        let expiration = chrono::Duration::from_std(expiration)
            .map_err(|e| KeeperError::Configuration(e.to_string()))?;

        let request = RecoveryRequest::new(
            group_id,
            initiator_identity,
            key_holders,
            *threshold,
            expiration,
        );
        self.storage.put_request(&request).await?;
        self.metrics.recovery_initiated();

        info!(
            request_id = %request.id,
            group_id = %group_id,
            threshold = *threshold,
            key_holders = key_holders.len(),
            expires_at = %request.expires_at,
            "Initiated recovery request"
        );

        self.announce(&request).await?;
        Ok(request)
    }

    async fn announce(&self, request: &RecoveryRequest) -> Result<()> {
        let relays = self.relays_for(&request.group_id).await?;
        let tags = [
            Tag::Group(request.group_id.clone()),
            Tag::Expiration(request.expires_at),
        ];
        let message = request.to_message();

        let sends = request
            .key_holders()
            .into_iter()
            .filter(|holder| holder != self.messenger.identity())
            .map(|holder| {
                let outbound = OutboundMessage::new(message.clone());
                let relays = &relays;
                let tags = &tags;
                async move {
                    let outcome = self
                        .messenger
                        .encrypt_and_send(&outbound, &holder, relays, tags)
                        .await;
                    (holder, outcome)
                }
            });

        for (holder, outcome) in futures::future::join_all(sends).await {
            let failure = match outcome {
                Ok(report) if report.is_published() => None,
                Ok(report) => Some(report.failure_summary()),
                Err(e) => Some(e.to_string()),
            };
            match failure {
                None => debug!(request_id = %request.id, recipient = %holder, "Sent recovery request"),
                Some(error) => {
                    self.metrics.recovery_request_send_failed();
                    warn!(
                        request_id = %request.id,
                        recipient = %holder,
                        error = %error,
                        "Failed to send recovery request"
                    );
                }
            }
        }
        Ok(())
    }

    /// Records `responder`'s decision on a request.
    ///
    /// An approval must carry the responder's share and a denial must not.
    /// A second answer from the same responder replaces the first, except
    /// that approvals on a completed request cannot be withdrawn or changed.
    pub async fn respond(
        &self,
        request_id: &str,
        responder_identity: &str,
        approved: bool,
        share: Option<Share>,
    ) -> Result<RecoveryRequest> {
        let _lock = self.lock_request(request_id).await;

        let mut request = self.load(request_id).await?.ok_or_else(|| {
            KeeperError::RequestNotFound {
                request_id: request_id.to_string(),
            }
        })?;
        let previous = request.status;
        let now = Utc::now();

        let response = RecoveryResponse {
            identity: responder_identity.to_string(),
            status: if approved {
                ResponseStatus::Approved
            } else {
                ResponseStatus::Denied
            },
            responded_at: Some(now),
            share,
        };

        if let Err(e) = request.apply_response(response, now) {
            if request.status != previous {
                self.storage.put_request(&request).await?;
                self.record_transition(&request, previous);
            }
            warn!(
                request_id = %request_id,
                responder = %responder_identity,
                error = %e,
                "Rejected recovery response"
            );
            return Err(e);
        }

        self.storage.put_request(&request).await?;
        self.metrics.response_recorded(approved);
        self.record_transition(&request, previous);

        info!(
            request_id = %request_id,
            responder = %responder_identity,
            approved = approved,
            approvals = request.approved_count(),
            threshold = request.threshold,
            status = %request.status,
            "Recorded recovery response"
        );
        Ok(request)
    }

    /// Loads a request, expiring it first if its deadline has passed.
    pub async fn get_request(&self, request_id: &str) -> Result<Option<RecoveryRequest>> {
        let _lock = self.lock_request(request_id).await;
        self.load(request_id).await
    }

    /// Records a request announced by its initiator. Importing the same request
    /// twice returns the stored copy unchanged.
    pub async fn import_request(&self, message: &RecoveryRequestMessage) -> Result<RecoveryRequest> {
        let _lock = self.lock_request(&message.request_id).await;

        if let Some(existing) = self.load(&message.request_id).await? {
            debug!(request_id = %message.request_id, "Recovery request already known");
            return Ok(existing);
        }

        let key_holders = if message.key_holders.is_empty() {
            self.storage
                .get_group(&message.group_id)
                .await?
                .map(|group| group.identities())
                .ok_or_else(|| KeeperError::GroupNotFound {
                    group_id: message.group_id.clone(),
                })?
        } else {
            message.key_holders.clone()
        };

        let mut request = RecoveryRequest::from_message(message, &key_holders);
        request.expire_if_due(Utc::now());
        self.storage.put_request(&request).await?;
        if request.status != RecoveryStatus::Expired {
            self.metrics.recovery_imported();
        }

        info!(
            request_id = %request.id,
            group_id = %request.group_id,
            initiator = %request.initiator_identity,
            status = %request.status,
            "Imported recovery request"
        );
        Ok(request)
    }

    /// All requests for a group, oldest first, with lazy expiry applied.
    pub async fn requests_for_group(&self, group_id: &str) -> Result<Vec<RecoveryRequest>> {
        let listed = self.storage.list_requests(group_id).await?;
        let now = Utc::now();

        let mut requests = Vec::with_capacity(listed.len());
        for request in listed {
            if !request.status.is_terminal() && request.is_past_deadline(now) {
                if let Some(current) = self.get_request(&request.id).await? {
                    requests.push(current);
                    continue;
                }
            }
            requests.push(request);
        }
        Ok(requests)
    }

    pub async fn status(&self, group_id: &str, identity: &str) -> Result<RecoveryStatusView> {
        let requests = self.requests_for_group(group_id).await?;
        Ok(RecoveryStatusView::project(
            &requests,
            group_id,
            identity,
            Utc::now(),
        ))
    }

    /// Caller must hold the request lock.
    async fn load(&self, request_id: &str) -> Result<Option<RecoveryRequest>> {
        let Some(mut request) = self.storage.get_request(request_id).await? else {
            return Ok(None);
        };
        let previous = request.status;
        if request.expire_if_due(Utc::now()) {
            self.storage.put_request(&request).await?;
            self.record_transition(&request, previous);
        }
        Ok(Some(request))
    }

    fn record_transition(&self, request: &RecoveryRequest, previous: RecoveryStatus) {
        if request.status == previous {
            return;
        }
        match request.status {
            RecoveryStatus::Completed => {
                self.metrics.recovery_completed();
                info!(
                    request_id = %request.id,
                    group_id = %request.group_id,
                    approvals = request.approved_count(),
                    "Recovery threshold reached"
                );
            }
            RecoveryStatus::Expired => {
                self.metrics.recovery_expired();
                info!(request_id = %request.id, "Recovery request expired");
            }
            _ => {}
        }
    }
}

/// Holds one request's lock. The map entry goes away on drop once no other
/// task holds or waits on it.
struct RequestLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    request_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RequestLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.request_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
