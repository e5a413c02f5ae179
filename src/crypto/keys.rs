//! Session key generation, signing, and verification.
//!
//! Session keys are Ed25519 key pairs that live only on this client. Public
//! keys and signatures travel hex-encoded inside message envelopes; the
//! private key is persisted hex-encoded inside the delegation record and
//! nowhere else.

use crate::crypto::decode_hex_array;
use crate::error::{OpchanError, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use zeroize::Zeroizing;

/// Length of a session public key in bytes.
pub const PUBLIC_KEY_LENGTH: usize = ed25519_dalek::PUBLIC_KEY_LENGTH;

/// Length of a session signature in bytes.
pub const SIGNATURE_LENGTH: usize = ed25519_dalek::SIGNATURE_LENGTH;

/// An ephemeral session key pair.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generates a fresh key pair from the OS random source.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restores a key pair from its hex-encoded 32-byte private key.
    pub fn from_private_hex(private_hex: &str) -> Result<Self> {
        let bytes: Zeroizing<[u8; 32]> = Zeroizing::new(
            decode_hex_array(private_hex)
                .ok_or_else(|| OpchanError::key("Session private key must be 32 hex-encoded bytes"))?,
        );
        Ok(Self {
            signing: SigningKey::from_bytes(&bytes),
        })
    }

    /// Returns the raw public key bytes.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.signing.verifying_key().to_bytes()
    }

    /// Returns the hex-encoded public key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    /// Returns the hex-encoded private key, wiped from memory on drop.
    pub fn private_key_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing.to_bytes()))
    }

    /// Signs raw bytes.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.signing.sign(message).to_bytes()
    }

    /// Signs raw bytes and returns the hex-encoded signature.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.sign(message))
    }
}

/// Verifies a hex-encoded session signature over `message`.
///
/// Malformed keys or signatures verify as `false`; this never errors.
pub fn verify_signature(public_key_hex: &str, message: &[u8], signature_hex: &str) -> bool {
    let Some(key_bytes) = decode_hex_array::<PUBLIC_KEY_LENGTH>(public_key_hex) else {
        return false;
    };
    let Some(sig_bytes) = decode_hex_array::<SIGNATURE_LENGTH>(signature_hex) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);
    verifying_key.verify(message, &signature).is_ok()
}
