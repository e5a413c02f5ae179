//! Two-tier authorization: wallet -> session key -> message.
//!
//! A wallet signs one human-readable statement authorizing an ephemeral
//! session key until an expiry. The session key then signs every forum
//! message, and each message carries the wallet's statement and signature
//! so any peer can check the whole chain offline.

pub mod manager;
pub mod proof;

pub use manager::{DelegationManager, DelegationStatus};
pub use proof::{
    create_auth_message, generate_nonce, AuthStatement, DelegationDuration, DelegationInfo,
    DelegationProof,
};
