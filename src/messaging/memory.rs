// src/messaging/memory.rs - In-process relay network

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::error::{KeeperError, Result};

use super::{
    Envelope, InboundMessage, InboundStream, MessageKind, Messenger, OutboundMessage,
    PublishReport, RelayOutcome, Tag,
};

const CHANNEL_CAPACITY: usize = 1024;

/// One event as accepted by the relays
#[derive(Debug, Clone)]
pub struct Delivery {
    pub event_id: String,
    pub sender: String,
    pub recipient: String,
    pub kind: MessageKind,
    pub payload: String,
    pub relays: Vec<String>,
    pub tags: Vec<Tag>,
    pub published_at: DateTime<Utc>,
}

impl Delivery {
    pub fn envelope(&self) -> Result<Envelope> {
        Envelope::decode(self.kind, &self.payload)
    }
}

struct NetworkState {
    channel: broadcast::Sender<Delivery>,
    published: DashMap<String, Delivery>,
    offline_relays: DashSet<String>,
    unreachable_recipients: DashSet<String>,
    attempts: DashMap<String, u32>,
}

/// Shared relay fabric for tests and single-process deployments.
///
/// Relays deduplicate by event id, so republishing an already accepted event
/// is acknowledged without a second delivery.
#[derive(Clone)]
pub struct MemoryRelayNetwork {
    state: Arc<NetworkState>,
}

impl MemoryRelayNetwork {
    pub fn new() -> Self {
        let (channel, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Arc::new(NetworkState {
                channel,
                published: DashMap::new(),
                offline_relays: DashSet::new(),
                unreachable_recipients: DashSet::new(),
                attempts: DashMap::new(),
            }),
        }
    }

    /// Messenger bound to `identity`
    pub fn endpoint(&self, identity: impl Into<String>) -> MemoryMessenger {
        MemoryMessenger {
            identity: identity.into(),
            network: self.clone(),
        }
    }

    pub fn set_relay_online(&self, relay: &str, online: bool) {
        if online {
            self.state.offline_relays.remove(relay);
        } else {
            self.state.offline_relays.insert(relay.to_string());
        }
    }

    /// Every publish addressed to `recipient` fails until cleared
    pub fn set_recipient_reachable(&self, recipient: &str, reachable: bool) {
        if reachable {
            self.state.unreachable_recipients.remove(recipient);
        } else {
            self.state.unreachable_recipients.insert(recipient.to_string());
        }
    }

    /// Publish attempts made towards `recipient`, successful or not
    pub fn attempts_for(&self, recipient: &str) -> u32 {
        self.state.attempts.get(recipient).map(|v| *v).unwrap_or(0)
    }

    pub fn published(&self) -> Vec<Delivery> {
        let mut deliveries: Vec<Delivery> =
            self.state.published.iter().map(|e| e.value().clone()).collect();
        deliveries.sort_by_key(|d| d.published_at);
        deliveries
    }

    pub fn published_to(&self, recipient: &str, kind: MessageKind) -> Vec<Delivery> {
        self.published()
            .into_iter()
            .filter(|d| d.recipient == recipient && d.kind == kind)
            .collect()
    }

    pub fn published_count(&self) -> usize {
        self.state.published.len()
    }

    /// Pushes an accepted event to subscribers again, as a relay replaying history would.
    pub fn redeliver(&self, event_id: &str) -> bool {
        match self.state.published.get(event_id) {
            Some(delivery) => {
                let _ = self.state.channel.send(delivery.clone());
                true
            }
            None => false,
        }
    }

    fn publish(
        &self,
        sender: &str,
        message: &OutboundMessage,
        recipient: &str,
        relays: &[String],
        tags: &[Tag],
    ) -> Result<PublishReport> {
        *self
            .state
            .attempts
            .entry(recipient.to_string())
            .or_insert(0) += 1;

        if relays.is_empty() {
            return Err(KeeperError::Transport("no relays to publish to".to_string()));
        }
        if self.state.unreachable_recipients.contains(recipient) {
            return Err(KeeperError::Transport(format!(
                "could not encrypt for recipient {recipient}"
            )));
        }

        let outcomes: Vec<RelayOutcome> = relays
            .iter()
            .map(|relay| {
                if self.state.offline_relays.contains(relay.as_str()) {
                    RelayOutcome {
                        relay: relay.clone(),
                        accepted: false,
                        error: Some("relay offline".to_string()),
                    }
                } else {
                    RelayOutcome {
                        relay: relay.clone(),
                        accepted: true,
                        error: None,
                    }
                }
            })
            .collect();

        let report = PublishReport {
            event_id: message.event_id.clone(),
            outcomes,
        };

        if !report.is_published() {
            warn!(
                event_id = %message.event_id,
                recipient = %recipient,
                "No relay accepted event"
            );
            return Ok(report);
        }

        if self.state.published.contains_key(&message.event_id) {
            debug!(event_id = %message.event_id, "Relays already hold event, skipping redelivery");
            return Ok(report);
        }

        let delivery = Delivery {
            event_id: message.event_id.clone(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            kind: message.envelope.kind(),
            payload: message.envelope.encode()?,
            relays: report
                .outcomes
                .iter()
                .filter(|o| o.accepted)
                .map(|o| o.relay.clone())
                .collect(),
            tags: tags.to_vec(),
            published_at: Utc::now(),
        };

        self.state
            .published
            .insert(delivery.event_id.clone(), delivery.clone());
        // No subscribers is not an error; relays keep the event for redelivery.
        let _ = self.state.channel.send(delivery);

        debug!(
            event_id = %message.event_id,
            recipient = %recipient,
            accepted = report.accepted_relays(),
            "Published event"
        );
        Ok(report)
    }
}

impl Default for MemoryRelayNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Messenger`] endpoint on a [`MemoryRelayNetwork`]
#[derive(Clone)]
pub struct MemoryMessenger {
    identity: String,
    network: MemoryRelayNetwork,
}

impl MemoryMessenger {
    pub fn network(&self) -> &MemoryRelayNetwork {
        &self.network
    }
}

#[async_trait]
impl Messenger for MemoryMessenger {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn encrypt_and_send(
        &self,
        message: &OutboundMessage,
        recipient: &str,
        relays: &[String],
        tags: &[Tag],
    ) -> Result<PublishReport> {
        self.network
            .publish(&self.identity, message, recipient, relays, tags)
    }

    async fn subscribe(&self, kind: MessageKind) -> Result<InboundStream> {
        let identity = self.identity.clone();
        let receiver = self.network.state.channel.subscribe();

        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let message = match item {
                Ok(delivery) if delivery.recipient == identity && delivery.kind == kind => {
                    match delivery.envelope() {
                        Ok(envelope) => Some(InboundMessage {
                            event_id: delivery.event_id,
                            sender: delivery.sender,
                            envelope,
                            received_at: Utc::now(),
                        }),
                        Err(e) => {
                            warn!(event_id = %delivery.event_id, error = %e, "Dropping undecodable event");
                            None
                        }
                    }
                }
                Ok(_) => None,
                Err(e) => {
                    warn!(identity = %identity, error = %e, "Subscriber lagged behind relay");
                    None
                }
            };
            futures::future::ready(message)
        });

        Ok(stream.boxed())
    }
}
