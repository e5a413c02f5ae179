//! Contract with the peer-to-peer publish/subscribe transport.
//!
//! The transport is an opaque channel: it accepts encoded frames on a content
//! topic and reports back asynchronously through a stream of
//! [`TransportEvent`]s carrying per-message delivery status, inbound frames,
//! and coarse health. Retries happen inside the transport; nothing above it
//! retransmits.

pub mod codec;
pub mod memory;

pub use codec::{Codec, JsonCodec};
pub use memory::{AckMode, MemoryNetwork, MemoryTransport};

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Coarse transport health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HealthStatus {
    /// No usable peers.
    #[default]
    Unhealthy,
    /// Enough peers to publish, without redundancy.
    MinimallyHealthy,
    /// Redundant peers for every protocol.
    SufficientlyHealthy,
}

impl HealthStatus {
    /// Collapses health to "can we send".
    pub fn is_ready(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Unhealthy => f.write_str("unhealthy"),
            HealthStatus::MinimallyHealthy => f.write_str("minimally-healthy"),
            HealthStatus::SufficientlyHealthy => f.write_str("sufficiently-healthy"),
        }
    }
}

/// Asynchronous notifications from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The frame was accepted for transmission. Not a delivery guarantee.
    Sent(String),
    /// A peer or store confirmed the frame. Terminal.
    Acknowledged(String),
    /// The transport gave up on the frame. Terminal.
    IrrecoverableError {
        /// Message id.
        id: String,
        /// Transport error text.
        error: String,
    },
    /// A frame arrived on the subscribed topic.
    Frame(Vec<u8>),
    /// Health changed.
    Health(HealthStatus),
}

impl TransportEvent {
    /// Message id for delivery-status events.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            TransportEvent::Sent(id) | TransportEvent::Acknowledged(id) => Some(id),
            TransportEvent::IrrecoverableError { id, .. } => Some(id),
            TransportEvent::Frame(_) | TransportEvent::Health(_) => None,
        }
    }
}

/// Outbound half of the transport.
///
/// `send` returning `Err` means the frame was never handed off; once it
/// returns `Ok`, the outcome arrives as [`TransportEvent`]s keyed by
/// `message_id`.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Publishes an encoded frame on a content topic.
    async fn send(&self, content_topic: &str, message_id: &str, frame: Vec<u8>) -> Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, content_topic: &str, message_id: &str, frame: Vec<u8>) -> Result<()> {
        (**self).send(content_topic, message_id, frame).await
    }
}
