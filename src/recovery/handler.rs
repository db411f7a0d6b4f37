// src/recovery/handler.rs - Inbound message dispatch

use dashmap::DashMap;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{KeeperError, Result};
use crate::messaging::{
    Envelope, InboundMessage, MessageKind, Messenger, RecoveryMessage, RecoveryResponseMessage,
    ShareEnvelope,
};
use crate::metrics::Metrics;
use crate::share::Share;
use crate::storage::Storage;

use super::coordinator::RecoveryCoordinator;
use super::request::RecoveryStatus;

/// What handling one inbound message did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    ShareStored { group_id: String },
    RequestImported { request_id: String, replayed: usize },
    ResponseRecorded { request_id: String, status: RecoveryStatus },
    ResponseParked { request_id: String },
    ResponseDropped { request_id: String },
}

struct Parked {
    sequence: u64,
    responses: Vec<RecoveryResponseMessage>,
}

/// Routes subscription traffic into storage and the coordinator.
///
/// Responses can arrive before the request they answer. Those are parked per
/// request id and replayed once the request is imported. Both the responses
/// per request and the number of parked request ids are capped; past the
/// second cap the longest-parked request id is evicted.
pub struct InboundHandler {
    messenger: Arc<dyn Messenger>,
    coordinator: Arc<RecoveryCoordinator>,
    storage: Arc<dyn Storage>,
    metrics: Arc<Metrics>,
    parked: DashMap<String, Parked>,
    park_sequence: AtomicU64,
    max_parked_responses: usize,
    max_parked_requests: usize,
}

impl InboundHandler {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        coordinator: Arc<RecoveryCoordinator>,
        storage: Arc<dyn Storage>,
        metrics: Arc<Metrics>,
        max_parked_responses: usize,
        max_parked_requests: usize,
    ) -> Self {
        Self {
            messenger,
            coordinator,
            storage,
            metrics,
            parked: DashMap::new(),
            park_sequence: AtomicU64::new(0),
            max_parked_responses,
            max_parked_requests,
        }
    }

    pub fn parked_count(&self) -> usize {
        self.parked
            .iter()
            .map(|entry| entry.value().responses.len())
            .sum()
    }

    /// Number of unknown request ids with parked responses
    pub fn parked_requests(&self) -> usize {
        self.parked.len()
    }

    /// Subscribes to every message kind, then processes messages on a spawned task.
    ///
    /// Subscriptions are in place when this returns. Handler errors are logged
    /// and never stop the loop; it ends when every subscription closes.
    pub async fn start(self: Arc<Self>) -> Result<JoinHandle<()>> {
        let streams = vec![
            self.messenger.subscribe(MessageKind::Share).await?,
            self.messenger.subscribe(MessageKind::RecoveryRequest).await?,
            self.messenger.subscribe(MessageKind::RecoveryResponse).await?,
        ];
        let mut inbound = futures::stream::select_all(streams);
        info!(identity = %self.messenger.identity(), "Inbound handler started");

        Ok(tokio::spawn(async move {
            while let Some(message) = inbound.next().await {
                let event_id = message.event_id.clone();
                match self.handle(message).await {
                    Ok(outcome) => debug!(event_id = %event_id, ?outcome, "Handled inbound message"),
                    Err(e) => warn!(event_id = %event_id, error = %e, "Failed to handle inbound message"),
                }
            }
            info!("Inbound handler stopped");
        }))
    }

    pub async fn handle(&self, message: InboundMessage) -> Result<HandleOutcome> {
        match message.envelope {
            Envelope::Share(envelope) => {
                self.store_share(&envelope, message.event_id, message.received_at)
                    .await
            }
            Envelope::Recovery(RecoveryMessage::RecoveryRequest(request)) => {
                let imported = self.coordinator.import_request(&request).await?;
                let replayed = self.replay(&imported.id).await;
                Ok(HandleOutcome::RequestImported {
                    request_id: imported.id,
                    replayed,
                })
            }
            Envelope::Recovery(RecoveryMessage::RecoveryResponse(response)) => {
                if response.responder_identity != message.sender {
                    return Err(KeeperError::UnknownResponder {
                        request_id: response.request_id,
                        identity: message.sender,
                    });
                }
                self.apply_response(response).await
            }
        }
    }

    async fn store_share(
        &self,
        envelope: &ShareEnvelope,
        event_id: String,
        received_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<HandleOutcome> {
        let share = Share::from_envelope(
            envelope,
            self.messenger.identity(),
            Some(event_id),
            received_at,
        );
        self.storage.put_received_share(&share).await?;
        info!(
            group_id = %share.group_id,
            share_index = share.index,
            creator = %share.creator_identity,
            "Stored received share"
        );
        Ok(HandleOutcome::ShareStored {
            group_id: share.group_id,
        })
    }

    async fn apply_response(&self, response: RecoveryResponseMessage) -> Result<HandleOutcome> {
        let share = response.share.as_ref().map(|envelope| {
            Share::from_envelope(
                envelope,
                &response.responder_identity,
                None,
                response.responded_at,
            )
        });

        match self
            .coordinator
            .respond(
                &response.request_id,
                &response.responder_identity,
                response.approved,
                share,
            )
            .await
        {
            Ok(request) => Ok(HandleOutcome::ResponseRecorded {
                request_id: request.id,
                status: request.status,
            }),
            Err(KeeperError::RequestNotFound { .. }) => Ok(self.park(response)),
            Err(e) => Err(e),
        }
    }

    fn park(&self, response: RecoveryResponseMessage) -> HandleOutcome {
        let request_id = response.request_id.clone();
        if self.max_parked_responses == 0 || self.max_parked_requests == 0 {
            warn!(request_id = %request_id, "Response parking disabled, dropping response");
            return HandleOutcome::ResponseDropped { request_id };
        }
        if !self.parked.contains_key(&request_id) {
            self.evict_oldest_parked();
        }

        let outcome = {
            let mut entry = self
                .parked
                .entry(request_id.clone())
                .or_insert_with(|| Parked {
                    sequence: self.park_sequence.fetch_add(1, Ordering::Relaxed),
                    responses: Vec::new(),
                });
            let parked = &mut entry.responses;
            if let Some(existing) = parked
                .iter_mut()
                .find(|p| p.responder_identity == response.responder_identity)
            {
                *existing = response;
                HandleOutcome::ResponseParked {
                    request_id: request_id.clone(),
                }
            } else if parked.len() >= self.max_parked_responses {
                warn!(
                    request_id = %request_id,
                    limit = self.max_parked_responses,
                    "Parked response limit reached, dropping response"
                );
                HandleOutcome::ResponseDropped {
                    request_id: request_id.clone(),
                }
            } else {
                debug!(request_id = %request_id, responder = %response.responder_identity, "Parked response for unknown request");
                parked.push(response);
                HandleOutcome::ResponseParked {
                    request_id: request_id.clone(),
                }
            }
        };
        self.metrics.set_parked_responses(self.parked_count());
        outcome
    }

    /// Makes room for one more parked request id.
    fn evict_oldest_parked(&self) {
        while self.parked.len() >= self.max_parked_requests {
            let oldest = self
                .parked
                .iter()
                .min_by_key(|entry| entry.value().sequence)
                .map(|entry| entry.key().clone());
            let Some(oldest) = oldest else {
                return;
            };
            if let Some((_, evicted)) = self.parked.remove(&oldest) {
                warn!(
                    request_id = %oldest,
                    dropped = evicted.responses.len(),
                    limit = self.max_parked_requests,
                    "Parked request limit reached, evicting oldest parked responses"
                );
            }
        }
    }

    /// Applies parked responses for a request that is now known. Returns how many were applied.
    async fn replay(&self, request_id: &str) -> usize {
        let Some((_, Parked { responses, .. })) = self.parked.remove(request_id) else {
            return 0;
        };
        self.metrics.set_parked_responses(self.parked_count());

        let mut applied = 0;
        for response in responses {
            let responder = response.responder_identity.clone();
            match self.apply_response(response).await {
                Ok(HandleOutcome::ResponseRecorded { .. }) => applied += 1,
                Ok(_) => {}
                Err(e) => warn!(
                    request_id = %request_id,
                    responder = %responder,
                    error = %e,
                    "Parked response rejected on replay"
                ),
            }
        }
        if applied > 0 {
            info!(request_id = %request_id, applied = applied, "Replayed parked responses");
        }
        applied
    }
}
