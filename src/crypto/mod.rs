//! Cryptographic primitives for opchan.
//!
//! Two independent signature layers meet here:
//!
//! - **Session keys** ([`keys`]): ephemeral Ed25519 key pairs generated in the
//!   client and used to sign every forum message.
//! - **Wallet signatures** ([`wallet`]): the one-time authorization a wallet
//!   gives to a session key, verified with the wallet's own scheme
//!   (secp256k1 recovery for Ethereum and Bitcoin).
//!
//! Content addressing uses SHA3-256.

use sha3::{Digest, Sha3_256};

pub mod keys;
pub mod wallet;

pub use keys::{verify_signature, KeyPair, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
pub use wallet::{DefaultWalletVerifier, WalletType, WalletVerifier};

/// Computes the SHA3-256 hash of data.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Decodes a hex string into a fixed-size array, accepting an optional `0x` prefix.
pub(crate) fn decode_hex_array<const N: usize>(s: &str) -> Option<[u8; N]> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(stripped).ok()?;
    bytes.try_into().ok()
}
