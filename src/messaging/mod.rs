//! Per-message delivery tracking on top of the transport.
//!
//! [`ReliableMessaging`] assigns every outgoing frame a content-addressed id
//! (SHA3-256 of the encoded bytes), hands back a [`DeliveryHandle`] that
//! receives that frame's status events, and fans decoded inbound frames out
//! to subscribers. Subscriber queues are unbounded so a slow consumer never
//! loses a message. It does not retry; the transport already does.

use crate::crypto::hash_data;
use crate::error::{OpchanError, Result};
use crate::message::OpchanMessage;
use crate::transport::{Codec, HealthStatus, Transport, TransportEvent};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Delivery status of one outgoing frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Accepted for transmission.
    Sent,
    /// Confirmed by the network. Terminal.
    Acknowledged,
    /// Abandoned by the transport. Terminal.
    Failed(String),
}

impl DeliveryStatus {
    /// Returns true for statuses after which no more events arrive.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Sent)
    }
}

/// Receives the status events of one send.
///
/// Dropping the handle stops listening; the registry entry is still removed
/// when the terminal event arrives.
#[derive(Debug)]
pub struct DeliveryHandle {
    message_id: String,
    events: mpsc::UnboundedReceiver<DeliveryStatus>,
}

impl DeliveryHandle {
    /// Content-addressed id of the frame.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Waits for the next status event. `None` once the stream has ended.
    pub async fn next_status(&mut self) -> Option<DeliveryStatus> {
        self.events.recv().await
    }

    /// Waits for the terminal event.
    ///
    /// Resolves to `Ok` on acknowledgement and to [`OpchanError::Transport`]
    /// carrying the transport's error text on failure.
    pub async fn outcome(mut self) -> Result<()> {
        while let Some(status) = self.events.recv().await {
            match status {
                DeliveryStatus::Sent => continue,
                DeliveryStatus::Acknowledged => return Ok(()),
                DeliveryStatus::Failed(error) => return Err(OpchanError::transport(error)),
            }
        }
        Err(OpchanError::transport(format!(
            "delivery tracking for {} ended without a result",
            self.message_id
        )))
    }
}

type StatusSender = mpsc::UnboundedSender<DeliveryStatus>;
type InboundSender = mpsc::UnboundedSender<OpchanMessage>;

/// Transport wrapper exposing per-message completion.
pub struct ReliableMessaging {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    deliveries: Mutex<HashMap<String, Vec<StatusSender>>>,
    subscribers: Mutex<Vec<InboundSender>>,
    health: Mutex<HealthStatus>,
}

impl fmt::Debug for ReliableMessaging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReliableMessaging")
            .field("codec", &self.codec)
            .field("in_flight", &self.in_flight())
            .field("health", &self.health())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl ReliableMessaging {
    /// Wraps a transport.
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<dyn Codec>) -> Self {
        Self {
            transport,
            codec,
            deliveries: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            health: Mutex::new(HealthStatus::default()),
        }
    }

    fn deliveries(&self) -> MutexGuard<'_, HashMap<String, Vec<StatusSender>>> {
        self.deliveries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Derives the id a frame is tracked under.
    pub fn message_id_for(frame: &[u8]) -> String {
        hex::encode(hash_data(frame))
    }

    /// Encodes and sends a message.
    ///
    /// The status channel is registered before the transport is invoked, so
    /// an immediate acknowledgement is never missed. If the transport
    /// refuses the frame, the registration is withdrawn and the error returned.
    pub async fn send_message(&self, message: &OpchanMessage) -> Result<DeliveryHandle> {
        let frame = self.codec.encode(message)?;
        let message_id = Self::message_id_for(&frame);

        let (sender, events) = mpsc::unbounded_channel();
        self.deliveries()
            .entry(message_id.clone())
            .or_default()
            .push(sender.clone());

        trace!(
            id = %message_id,
            message = message.id(),
            bytes = frame.len(),
            "Sending frame"
        );
        if let Err(e) = self
            .transport
            .send(self.codec.content_topic(), &message_id, frame)
            .await
        {
            self.withdraw(&message_id, &sender);
            warn!(id = %message_id, "Transport refused frame: {}", e);
            return Err(e);
        }

        Ok(DeliveryHandle { message_id, events })
    }

    fn withdraw(&self, message_id: &str, sender: &StatusSender) {
        let mut deliveries = self.deliveries();
        if let Some(senders) = deliveries.get_mut(message_id) {
            senders.retain(|registered| !registered.same_channel(sender));
            if senders.is_empty() {
                deliveries.remove(message_id);
            }
        }
    }

    fn publish_status(&self, message_id: &str, status: DeliveryStatus) {
        let senders = if status.is_terminal() {
            self.deliveries().remove(message_id).unwrap_or_default()
        } else {
            self.deliveries()
                .get(message_id)
                .cloned()
                .unwrap_or_default()
        };
        if senders.is_empty() {
            trace!(id = message_id, ?status, "Status for untracked frame");
        }
        for sender in senders {
            // The caller may have dropped its handle.
            let _ = sender.send(status.clone());
        }
    }

    /// Dispatches one transport event.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Sent(id) => {
                trace!(id = %id, "Frame sent");
                self.publish_status(&id, DeliveryStatus::Sent);
            }
            TransportEvent::Acknowledged(id) => {
                debug!(id = %id, "Frame acknowledged");
                self.publish_status(&id, DeliveryStatus::Acknowledged);
            }
            TransportEvent::IrrecoverableError { id, error } => {
                error!(id = %id, "Frame delivery failed: {}", error);
                self.publish_status(&id, DeliveryStatus::Failed(error));
            }
            TransportEvent::Frame(frame) => match self.codec.decode(&frame) {
                Ok(message) => {
                    trace!(id = message.id(), kind = %message.kind(), "Received message");
                    self.publish_inbound(message);
                }
                Err(e) => warn!(bytes = frame.len(), "Dropping undecodable frame: {}", e),
            },
            TransportEvent::Health(health) => {
                let mut current = self.health.lock().unwrap_or_else(PoisonError::into_inner);
                let previous = *current;
                if previous != health {
                    *current = health;
                    info!(from = %previous, to = %health, "Transport health changed");
                }
            }
        }
    }

    fn publish_inbound(&self, message: OpchanMessage) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        // Dropped receivers unsubscribe.
        subscribers.retain(|subscriber| subscriber.send(message.clone()).is_ok());
    }

    /// Consumes the transport's event stream until it closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("Transport event stream closed");
    }

    /// Subscribes to decoded inbound messages.
    ///
    /// Every subscriber receives every message decoded after it subscribed,
    /// in arrival order. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<OpchanMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    /// Number of live inbound subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|subscriber| !subscriber.is_closed());
        subscribers.len()
    }

    /// Latest reported transport health.
    pub fn health(&self) -> HealthStatus {
        *self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True unless the transport reports itself unhealthy.
    pub fn is_ready(&self) -> bool {
        self.health().is_ready()
    }

    /// Number of frames awaiting a terminal event.
    pub fn in_flight(&self) -> usize {
        self.deliveries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::WalletType;
    use crate::delegation::DelegationProof;
    use crate::message::{CommentPayload, MessagePayload, UnsignedMessage};
    use crate::transport::{AckMode, JsonCodec, MemoryNetwork, MemoryTransport};

    const TOPIC: &str = "/test/1/messages/json";

    fn comment(id: &str) -> OpchanMessage {
        OpchanMessage {
            unsigned: UnsignedMessage::new(
                id,
                "0xA",
                10,
                MessagePayload::Comment(CommentPayload {
                    post_id: "p1".to_string(),
                    content: "hi".to_string(),
                }),
            ),
            signature: "aa".to_string(),
            browser_pub_key: "bb".to_string(),
            delegation_proof: DelegationProof {
                auth_message: "m".to_string(),
                wallet_signature: "s".to_string(),
                expiry_timestamp: 1,
                wallet_address: "0xA".to_string(),
                wallet_type: WalletType::Ethereum,
            },
        }
    }

    fn setup() -> (
        Arc<ReliableMessaging>,
        Arc<MemoryTransport>,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let network = MemoryNetwork::new();
        let (transport, events) = network.join(TOPIC);
        let transport = Arc::new(transport);
        let messaging = Arc::new(ReliableMessaging::new(
            transport.clone(),
            Arc::new(JsonCodec::new(TOPIC)),
        ));
        (messaging, transport, events)
    }

    #[tokio::test]
    async fn test_ack_resolves_handle_and_removes_entry() {
        let (messaging, _transport, events) = setup();
        let mut inbound = messaging.subscribe();
        tokio::spawn(messaging.clone().run(events));

        let handle = messaging.send_message(&comment("c1")).await.unwrap();
        assert_eq!(handle.message_id().len(), 64);
        handle.outcome().await.unwrap();
        assert_eq!(messaging.in_flight(), 0);

        assert_eq!(inbound.recv().await.unwrap(), comment("c1"));
    }

    #[tokio::test]
    async fn test_ids_are_content_addressed() {
        let (messaging, transport, _events) = setup();
        transport.set_ack_mode(AckMode::Manual);

        let first = messaging.send_message(&comment("c1")).await.unwrap();
        let again = messaging.send_message(&comment("c1")).await.unwrap();
        let other = messaging.send_message(&comment("c2")).await.unwrap();
        assert_eq!(first.message_id(), again.message_id());
        assert_ne!(first.message_id(), other.message_id());
        assert_eq!(messaging.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_irrecoverable_error_surfaces_transport_text() {
        let (messaging, transport, events) = setup();
        tokio::spawn(messaging.clone().run(events));
        transport.set_ack_mode(AckMode::Fail("store nodes unreachable".into()));

        let mut handle = messaging.send_message(&comment("c1")).await.unwrap();
        assert_eq!(handle.next_status().await, Some(DeliveryStatus::Sent));
        match handle.outcome().await {
            Err(OpchanError::Transport(text)) => assert_eq!(text, "store nodes unreachable"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(messaging.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_synchronous_failure_deregisters() {
        let (messaging, transport, _events) = setup();
        transport.set_offline(true);
        assert!(messaging.send_message(&comment("c1")).await.is_err());
        assert_eq!(messaging.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_bad_frame_does_not_affect_others() {
        let (messaging, _transport, _events) = setup();
        let mut inbound = messaging.subscribe();

        messaging.handle_event(TransportEvent::Frame(b"garbage".to_vec()));
        let good = serde_json::to_vec(&comment("c2")).unwrap();
        messaging.handle_event(TransportEvent::Frame(good));

        assert_eq!(inbound.recv().await.unwrap(), comment("c2"));
    }

    #[tokio::test]
    async fn test_slow_subscriber_loses_nothing() {
        let (messaging, _transport, _events) = setup();
        let mut inbound = messaging.subscribe();
        let dropped = messaging.subscribe();
        drop(dropped);

        for i in 0..5_000 {
            let frame = serde_json::to_vec(&comment(&format!("c{}", i))).unwrap();
            messaging.handle_event(TransportEvent::Frame(frame));
        }
        assert_eq!(messaging.subscriber_count(), 1);

        for i in 0..5_000 {
            assert_eq!(inbound.recv().await.unwrap().id(), format!("c{}", i));
        }
        assert!(inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_health_tracking() {
        let (messaging, _transport, _events) = setup();
        assert!(!messaging.is_ready());
        messaging.handle_event(TransportEvent::Health(HealthStatus::MinimallyHealthy));
        assert!(messaging.is_ready());
        assert_eq!(messaging.health(), HealthStatus::MinimallyHealthy);
    }
}
