//! Wallet signature verification.
//!
//! A delegation is only as good as the wallet signature over its
//! authorization statement. Verification is injected through
//! [`WalletVerifier`]; [`DefaultWalletVerifier`] covers both supported wallet
//! families offline:
//!
//! - **Ethereum**: `personal_sign` (EIP-191). The digest is
//!   `keccak256("\x19Ethereum Signed Message:\n" || len || message)` and the
//!   signature is 65 hex-encoded bytes `r || s || v`. The signer's address is
//!   recovered and compared case-insensitively.
//! - **Bitcoin**: legacy message signing (BIP-137). The digest is
//!   `sha256d(varint(24) || "Bitcoin Signed Message:\n" || varint(len) || message)`
//!   and the signature is 65 base64-encoded bytes `header || r || s`. The
//!   recovered key is matched against P2PKH and P2SH-P2WPKH addresses.

use crate::error::{OpchanError, Result};
use base64::Engine;
use ripemd::Ripemd160;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Bitcoin mainnet P2PKH address version byte.
const BTC_P2PKH_VERSION: u8 = 0x00;

/// Bitcoin mainnet P2SH address version byte.
const BTC_P2SH_VERSION: u8 = 0x05;

/// Magic prefix for Bitcoin signed messages.
const BTC_MESSAGE_MAGIC: &[u8] = b"Bitcoin Signed Message:\n";

/// Magic prefix for Ethereum signed messages.
const ETH_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// The wallet family that signed a delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    /// Bitcoin wallet (message signing).
    Bitcoin,
    /// Ethereum wallet (`personal_sign`).
    Ethereum,
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletType::Bitcoin => write!(f, "bitcoin"),
            WalletType::Ethereum => write!(f, "ethereum"),
        }
    }
}

impl FromStr for WalletType {
    type Err = OpchanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bitcoin" => Ok(WalletType::Bitcoin),
            "ethereum" => Ok(WalletType::Ethereum),
            other => Err(OpchanError::invalid_input(format!(
                "Unknown wallet type: {}",
                other
            ))),
        }
    }
}

/// Verifies that `address` produced `signature` over `message`.
///
/// Implementations must return `false` rather than panic on malformed input.
pub trait WalletVerifier: Send + Sync + fmt::Debug {
    /// Returns true if the signature is a valid wallet signature by `address`.
    fn verify(&self, wallet_type: WalletType, address: &str, message: &str, signature: &str)
        -> bool;
}

/// Offline verifier for Ethereum and Bitcoin wallet signatures.
///
/// Supported: Ethereum EIP-191 `personal_sign`, and Bitcoin BIP-137 signed
/// messages for legacy P2PKH (`1...`) and P2SH-P2WPKH (`3...`) addresses.
///
/// # Bech32 addresses
///
/// Native segwit and taproot addresses (`bc1...`, `tb1...`) sign with
/// BIP-322, which this verifier does not implement; every signature for
/// such an address is rejected, so those wallets cannot delegate and their
/// messages never verify. Ordinals and most modern Bitcoin wallets default
/// to taproot. Clients that must accept them supply their own
/// [`WalletVerifier`] through
/// [`OpchanClientBuilder::wallet_verifier`](crate::OpchanClientBuilder::wallet_verifier).
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultWalletVerifier;

impl WalletVerifier for DefaultWalletVerifier {
    fn verify(
        &self,
        wallet_type: WalletType,
        address: &str,
        message: &str,
        signature: &str,
    ) -> bool {
        let verified = match wallet_type {
            WalletType::Ethereum => verify_ethereum(address, message, signature),
            WalletType::Bitcoin => verify_bitcoin(address, message, signature),
        };
        if !verified {
            debug!(%wallet_type, address, "wallet signature did not verify");
        }
        verified
    }
}

// =============================================================================
// Ethereum
// =============================================================================

/// Computes the EIP-191 `personal_sign` digest of a message.
pub fn ethereum_message_digest(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(ETH_MESSAGE_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Derives the lowercase `0x`-prefixed Ethereum address of a public key.
pub fn ethereum_address(public_key: &PublicKey) -> String {
    let uncompressed = public_key.serialize_uncompressed();
    let hash = Keccak256::digest(&uncompressed[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

fn verify_ethereum(address: &str, message: &str, signature: &str) -> bool {
    let Some(sig) = crate::crypto::decode_hex_array::<65>(signature) else {
        return false;
    };
    let recovery_byte = match sig[64] {
        v @ 0..=1 => v,
        v @ 27..=28 => v - 27,
        _ => return false,
    };
    let Some(public_key) = recover(&ethereum_message_digest(message), &sig[..64], recovery_byte)
    else {
        return false;
    };
    ethereum_address(&public_key).eq_ignore_ascii_case(address)
}

// =============================================================================
// Bitcoin
// =============================================================================

/// Computes the BIP-137 signed-message digest of a message.
pub fn bitcoin_message_digest(message: &str) -> [u8; 32] {
    let mut data = Vec::with_capacity(BTC_MESSAGE_MAGIC.len() + message.len() + 10);
    write_varint(&mut data, BTC_MESSAGE_MAGIC.len() as u64);
    data.extend_from_slice(BTC_MESSAGE_MAGIC);
    write_varint(&mut data, message.len() as u64);
    data.extend_from_slice(message.as_bytes());
    double_sha256(&data)
}

/// Derives the Base58Check P2PKH address of a public key.
pub fn bitcoin_p2pkh_address(public_key: &PublicKey, compressed: bool) -> String {
    let hash = if compressed {
        hash160(&public_key.serialize())
    } else {
        hash160(&public_key.serialize_uncompressed())
    };
    base58check(BTC_P2PKH_VERSION, &hash)
}

/// Derives the Base58Check P2SH-wrapped P2WPKH address of a public key.
pub fn bitcoin_p2sh_p2wpkh_address(public_key: &PublicKey) -> String {
    let mut redeem_script = vec![0x00, 0x14];
    redeem_script.extend_from_slice(&hash160(&public_key.serialize()));
    base58check(BTC_P2SH_VERSION, &hash160(&redeem_script))
}

fn verify_bitcoin(address: &str, message: &str, signature: &str) -> bool {
    let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(signature) else {
        return false;
    };
    if bytes.len() != 65 {
        return false;
    }
    let header = bytes[0];
    if !(27..=42).contains(&header) {
        return false;
    }
    let recovery_byte = (header - 27) & 3;
    let compressed = header >= 31;

    let Some(public_key) = recover(&bitcoin_message_digest(message), &bytes[1..], recovery_byte)
    else {
        return false;
    };

    if address.starts_with("bc1") || address.starts_with("tb1") {
        debug!(address, "bech32 addresses are not verifiable by the default verifier");
        return false;
    }

    if compressed {
        bitcoin_p2pkh_address(&public_key, true) == address
            || bitcoin_p2sh_p2wpkh_address(&public_key) == address
    } else {
        bitcoin_p2pkh_address(&public_key, false) == address
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn recover(digest: &[u8; 32], compact: &[u8], recovery_byte: u8) -> Option<PublicKey> {
    let recovery_id = RecoveryId::from_i32(recovery_byte as i32).ok()?;
    let signature = RecoverableSignature::from_compact(compact, recovery_id).ok()?;
    let message = Message::from_digest(*digest);
    Secp256k1::verification_only()
        .recover_ecdsa(&message, &signature)
        .ok()
}

fn write_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

fn base58check(version: u8, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + payload.len() + 4);
    data.push(version);
    data.extend_from_slice(payload);
    let checksum = double_sha256(&data);
    data.extend_from_slice(&checksum[..4]);
    bs58::encode(data).into_string()
}
