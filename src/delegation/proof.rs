//! Delegation proofs and the human-readable authorization statement.
//!
//! The wallet signs a single plain-text statement binding a session public
//! key to an expiry:
//!
//! ```text
//! I, {address}, authorize browser key {pubkey} until {expiry} (nonce: {nonce})
//! ```
//!
//! The statement travels inside every message as part of the
//! [`DelegationProof`]. Verifiers never trust it as-is: they parse the nonce
//! back out, rebuild the statement from the message's own `browserPubKey`
//! and the proof's address and expiry, and require byte equality.

use crate::constants::{DAY_MS, DELEGATION_NONCE_BYTES};
use crate::crypto::WalletType;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// How long a delegation stays valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegationDuration {
    /// Seven days.
    #[default]
    #[serde(rename = "7days")]
    SevenDays,
    /// Thirty days.
    #[serde(rename = "30days")]
    ThirtyDays,
}

impl DelegationDuration {
    /// Returns the duration in milliseconds.
    pub fn as_millis(&self) -> u64 {
        match self {
            DelegationDuration::SevenDays => 7 * DAY_MS,
            DelegationDuration::ThirtyDays => 30 * DAY_MS,
        }
    }
}

/// Wallet-signed authorization carried verbatim by every delegated message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationProof {
    /// The signed statement.
    pub auth_message: String,
    /// Wallet signature over `auth_message` (hex for Ethereum, base64 for Bitcoin).
    pub wallet_signature: String,
    /// Expiry in milliseconds since the Unix epoch.
    pub expiry_timestamp: u64,
    /// Address of the delegating wallet.
    pub wallet_address: String,
    /// Wallet family, selecting the signature scheme.
    pub wallet_type: WalletType,
}

impl DelegationProof {
    /// Returns true if the proof is still valid at `now_ms`.
    pub fn is_live(&self, now_ms: u64) -> bool {
        now_ms < self.expiry_timestamp
    }

    /// Checks that `auth_message` is exactly the statement this proof claims.
    ///
    /// The nonce is the only component not carried elsewhere, so it is taken
    /// from the statement itself; everything else comes from the proof and
    /// the message's session key.
    pub fn statement_matches(&self, browser_public_key: &str) -> bool {
        let Some(parsed) = AuthStatement::parse(&self.auth_message) else {
            return false;
        };
        let expected = create_auth_message(
            &self.wallet_address,
            browser_public_key,
            self.expiry_timestamp,
            &parsed.nonce,
        );
        expected == self.auth_message
    }

    /// Returns true if messages authored by `author` may carry this proof.
    ///
    /// Ethereum addresses compare case-insensitively (EIP-55 checksumming
    /// only changes case); Bitcoin addresses compare exactly.
    pub fn authorizes(&self, author: &str) -> bool {
        match self.wallet_type {
            WalletType::Ethereum => self.wallet_address.eq_ignore_ascii_case(author),
            WalletType::Bitcoin => self.wallet_address == author,
        }
    }
}

/// Locally held delegation: the proof plus the session key that it authorizes.
///
/// The private key never leaves this struct except to sign; it is wiped
/// when the struct is dropped.
#[derive(Clone, Serialize, Deserialize)]
pub struct DelegationInfo {
    /// The shareable proof.
    pub proof: DelegationProof,
    /// Hex-encoded session public key.
    pub browser_public_key: String,
    /// Hex-encoded session private key.
    pub browser_private_key: String,
    /// Nonce embedded in the statement.
    pub nonce: String,
}

impl fmt::Debug for DelegationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegationInfo")
            .field("wallet_address", &self.proof.wallet_address)
            .field("wallet_type", &self.proof.wallet_type)
            .field("expiry_timestamp", &self.proof.expiry_timestamp)
            .field("browser_public_key", &self.browser_public_key)
            .finish_non_exhaustive()
    }
}

impl Drop for DelegationInfo {
    fn drop(&mut self) {
        self.browser_private_key.zeroize();
    }
}

/// The parsed components of an authorization statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStatement {
    /// Wallet address.
    pub address: String,
    /// Hex-encoded session public key.
    pub browser_public_key: String,
    /// Expiry in milliseconds since the Unix epoch.
    pub expiry_timestamp: u64,
    /// Random nonce.
    pub nonce: String,
}

impl AuthStatement {
    /// Parses a statement produced by [`create_auth_message`].
    pub fn parse(message: &str) -> Option<Self> {
        let rest = message.strip_prefix("I, ")?;
        let (address, rest) = rest.split_once(", authorize browser key ")?;
        let (browser_public_key, rest) = rest.split_once(" until ")?;
        let (expiry, rest) = rest.split_once(" (nonce: ")?;
        let nonce = rest.strip_suffix(')')?;

        Some(Self {
            address: address.to_string(),
            browser_public_key: browser_public_key.to_string(),
            expiry_timestamp: expiry.parse().ok()?,
            nonce: nonce.to_string(),
        })
    }
}

/// Builds the authorization statement a wallet signs.
pub fn create_auth_message(
    address: &str,
    browser_public_key: &str,
    expiry_timestamp: u64,
    nonce: &str,
) -> String {
    format!(
        "I, {}, authorize browser key {} until {} (nonce: {})",
        address, browser_public_key, expiry_timestamp, nonce
    )
}

/// Generates a fresh hex-encoded nonce.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; DELEGATION_NONCE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
