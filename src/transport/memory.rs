//! In-process pub/sub network for tests and local demos.
//!
//! Every node joined to a [`MemoryNetwork`] receives every frame published
//! on a topic it subscribed to, including its own (the local echo a real
//! relay network produces). Delivery status is driven by [`AckMode`].

use super::{HealthStatus, Transport, TransportEvent};
use crate::error::{OpchanError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// How a node's sends are resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AckMode {
    /// Emit `Sent` then `Acknowledged` immediately.
    #[default]
    Auto,
    /// Emit `Sent` only; call [`MemoryTransport::acknowledge`] or
    /// [`MemoryTransport::fail`] to resolve.
    Manual,
    /// Emit `Sent` then `IrrecoverableError` with this text. The frame is not delivered.
    Fail(String),
}

#[derive(Debug)]
struct Node {
    events: mpsc::UnboundedSender<TransportEvent>,
    topics: HashSet<String>,
}

/// A shared bus connecting [`MemoryTransport`] nodes.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    nodes: Mutex<Vec<Node>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Node>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a node subscribed to `content_topic`.
    ///
    /// Returns the node's transport and the receiving end of its event stream.
    pub fn join(
        self: &Arc<Self>,
        content_topic: &str,
    ) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let mut nodes = self.lock();
        let index = nodes.len();
        nodes.push(Node {
            events,
            topics: HashSet::from([content_topic.to_string()]),
        });
        debug!(node = index, topic = content_topic, "Node joined memory network");

        let transport = MemoryTransport {
            network: self.clone(),
            index,
            state: Mutex::new(NodeState::default()),
        };
        (transport, receiver)
    }

    fn emit(&self, index: usize, event: TransportEvent) {
        if let Some(node) = self.lock().get(index) {
            // A closed receiver means the node has shut down.
            let _ = node.events.send(event);
        }
    }

    fn publish(&self, content_topic: &str, frame: &[u8]) -> usize {
        let nodes = self.lock();
        let mut delivered = 0;
        for node in nodes.iter().filter(|node| node.topics.contains(content_topic)) {
            if node.events.send(TransportEvent::Frame(frame.to_vec())).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

#[derive(Debug, Default)]
struct NodeState {
    ack_mode: AckMode,
    offline: bool,
    sent: Vec<String>,
}

/// One node's handle onto a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    index: usize,
    state: Mutex<NodeState>,
}

impl MemoryTransport {
    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes how subsequent sends resolve.
    pub fn set_ack_mode(&self, mode: AckMode) {
        self.state().ack_mode = mode;
    }

    /// While offline, `send` fails synchronously.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Ids handed to `send`, in order.
    pub fn sent_ids(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// Reports a pending send as acknowledged.
    pub fn acknowledge(&self, message_id: &str) {
        self.network
            .emit(self.index, TransportEvent::Acknowledged(message_id.to_string()));
    }

    /// Reports a pending send as irrecoverably failed.
    pub fn fail(&self, message_id: &str, error: &str) {
        self.network.emit(
            self.index,
            TransportEvent::IrrecoverableError {
                id: message_id.to_string(),
                error: error.to_string(),
            },
        );
    }

    /// Reports a health change to this node.
    pub fn set_health(&self, health: HealthStatus) {
        self.network.emit(self.index, TransportEvent::Health(health));
    }

    /// Injects a raw inbound frame, as if a peer had published it.
    pub fn inject_frame(&self, frame: Vec<u8>) {
        self.network.emit(self.index, TransportEvent::Frame(frame));
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, content_topic: &str, message_id: &str, frame: Vec<u8>) -> Result<()> {
        let ack_mode = {
            let mut state = self.state();
            if state.offline {
                return Err(OpchanError::transport("node is offline"));
            }
            state.sent.push(message_id.to_string());
            state.ack_mode.clone()
        };

        self.network
            .emit(self.index, TransportEvent::Sent(message_id.to_string()));

        match ack_mode {
            AckMode::Auto => {
                let delivered = self.network.publish(content_topic, &frame);
                trace!(id = message_id, delivered, "Published frame");
                self.acknowledge(message_id);
            }
            AckMode::Manual => {
                let delivered = self.network.publish(content_topic, &frame);
                trace!(id = message_id, delivered, "Published frame");
            }
            AckMode::Fail(error) => self.fail(message_id, &error),
        }
        Ok(())
    }
}
