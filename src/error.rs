//! Error types for opchan operations.
//!
//! Validation and store-layer failures never surface through this type:
//! those resolve to `false`/`None` at their component boundary. What remains
//! here is what a caller can act on (re-delegate, retry a send, fix config).

use thiserror::Error;

/// Result type alias for opchan operations.
pub type Result<T> = std::result::Result<T, OpchanError>;

/// Main error type for opchan operations.
#[derive(Error, Debug)]
pub enum OpchanError {
    /// Key parsing or generation errors
    #[error("Key error: {0}")]
    Key(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Backing store errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// No delegation has been created for this client
    #[error("No delegation: create a delegation before signing messages")]
    NoDelegation,

    /// The delegation exists but its expiry has passed
    #[error("Delegation expired at {expired_at}: please re-delegate your wallet")]
    DelegationExpired {
        /// Expiry timestamp (ms since epoch) of the stale delegation.
        expired_at: u64,
    },

    /// The wallet refused the prompt, or returned a signature that does not verify
    #[error("Wallet rejected signature request: {0}")]
    WalletRejected(String),

    /// Irrecoverable transport failure, carried verbatim from the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Frame encoding/decoding errors
    #[error("Codec error: {0}")]
    Codec(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl OpchanError {
    /// Creates a new key error.
    pub fn key<T: ToString>(msg: T) -> Self {
        Self::Key(msg.to_string())
    }

    /// Creates a new serialization error.
    pub fn serialization<T: ToString>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Creates a new invalid input error.
    pub fn invalid_input<T: ToString>(msg: T) -> Self {
        Self::InvalidInput(msg.to_string())
    }

    /// Creates a new storage error.
    pub fn storage<T: ToString>(msg: T) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Creates a new wallet rejection error.
    pub fn wallet_rejected<T: ToString>(msg: T) -> Self {
        Self::WalletRejected(msg.to_string())
    }

    /// Creates a new transport error.
    pub fn transport<T: ToString>(msg: T) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Creates a new codec error.
    pub fn codec<T: ToString>(msg: T) -> Self {
        Self::Codec(msg.to_string())
    }

    /// Creates a new configuration error.
    pub fn config<T: ToString>(msg: T) -> Self {
        Self::Config(msg.to_string())
    }

    /// Returns true if this error means the user has to (re-)delegate.
    pub fn needs_delegation(&self) -> bool {
        matches!(self, Self::NoDelegation | Self::DelegationExpired { .. })
    }
}

impl From<serde_json::Error> for OpchanError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_delegation() {
        assert!(OpchanError::NoDelegation.needs_delegation());
        assert!(OpchanError::DelegationExpired { expired_at: 1 }.needs_delegation());
        assert!(!OpchanError::wallet_rejected("declined").needs_delegation());
        assert!(!OpchanError::transport("offline").needs_delegation());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = OpchanError::DelegationExpired { expired_at: 42 };
        assert_eq!(
            err.to_string(),
            "Delegation expired at 42: please re-delegate your wallet"
        );
        assert_eq!(
            OpchanError::wallet_rejected("user rejected").to_string(),
            "Wallet rejected signature request: user rejected"
        );
    }
}
