//! Frame codec between [`OpchanMessage`] and transport bytes.

use crate::constants::{DEFAULT_CONTENT_TOPIC, MAX_FRAME_SIZE};
use crate::error::{OpchanError, Result};
use crate::message::OpchanMessage;
use std::fmt;

/// Encodes and decodes frames for one content topic.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Topic this codec publishes to and decodes from.
    fn content_topic(&self) -> &str;

    /// Encodes a message into a frame.
    fn encode(&self, message: &OpchanMessage) -> Result<Vec<u8>>;

    /// Decodes a frame into a message.
    fn decode(&self, frame: &[u8]) -> Result<OpchanMessage>;
}

/// UTF-8 JSON frames, one flat message object per frame.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    content_topic: String,
}

impl JsonCodec {
    /// Creates a codec for `content_topic`.
    pub fn new(content_topic: impl Into<String>) -> Self {
        Self {
            content_topic: content_topic.into(),
        }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(DEFAULT_CONTENT_TOPIC)
    }
}

impl Codec for JsonCodec {
    fn content_topic(&self) -> &str {
        &self.content_topic
    }

    fn encode(&self, message: &OpchanMessage) -> Result<Vec<u8>> {
        let frame = serde_json::to_vec(message)
            .map_err(|e| OpchanError::codec(format!("Failed to encode message: {}", e)))?;
        if frame.len() > MAX_FRAME_SIZE {
            return Err(OpchanError::codec(format!(
                "Frame too large: {} bytes (max {})",
                frame.len(),
                MAX_FRAME_SIZE
            )));
        }
        Ok(frame)
    }

    fn decode(&self, frame: &[u8]) -> Result<OpchanMessage> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(OpchanError::codec(format!(
                "Frame too large: {} bytes (max {})",
                frame.len(),
                MAX_FRAME_SIZE
            )));
        }
        serde_json::from_slice(frame)
            .map_err(|e| OpchanError::codec(format!("Failed to decode frame: {}", e)))
    }
}
