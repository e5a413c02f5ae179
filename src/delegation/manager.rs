//! Delegation lifecycle: create, cache, sign, verify, expire, clear.
//!
//! A delegation moves through
//! `NONE -> PENDING_SIGNATURE -> ACTIVE -> EXPIRED | CLEARED`.
//! The pending state lives only for the duration of [`DelegationManager::delegate`]
//! (the wallet prompt); nothing is cached or persisted until the wallet has
//! signed and the signature verifies. Expiry is never cached: every status
//! query and every signature re-reads the clock.

use crate::clock::Clock;
use crate::crypto::{verify_signature, KeyPair, WalletType, WalletVerifier};
use crate::delegation::proof::{
    create_auth_message, generate_nonce, DelegationDuration, DelegationInfo, DelegationProof,
};
use crate::error::{OpchanError, Result};
use crate::message::{OpchanMessage, UnsignedMessage};
use crate::storage::{RocksDbHandle, Table, CURRENT_KEY};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Snapshot of the current delegation, derived fresh on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationStatus {
    /// A delegation record exists (possibly expired).
    pub has_delegation: bool,
    /// The delegation exists, has not expired, and matches the requested wallet.
    pub is_valid: bool,
    /// Milliseconds until expiry, when valid.
    pub time_remaining: Option<u64>,
    /// Session public key.
    pub public_key: Option<String>,
    /// Delegating wallet address.
    pub address: Option<String>,
    /// Delegating wallet family.
    pub wallet_type: Option<WalletType>,
    /// The shareable proof.
    pub proof: Option<DelegationProof>,
}

/// Owns the local delegation and verifies everyone else's.
pub struct DelegationManager {
    db: Arc<RocksDbHandle>,
    wallet_verifier: Arc<dyn WalletVerifier>,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<DelegationInfo>>,
    verifications: AtomicU64,
}

impl fmt::Debug for DelegationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegationManager")
            .field("wallet_verifier", &self.wallet_verifier)
            .field("has_delegation", &self.current().is_some())
            .finish_non_exhaustive()
    }
}

impl DelegationManager {
    /// Creates a manager, loading any persisted delegation.
    ///
    /// An unreadable record is logged and treated as absent.
    pub fn new(
        db: Arc<RocksDbHandle>,
        wallet_verifier: Arc<dyn WalletVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cached = match db.get::<DelegationInfo>(Table::Delegation.name(), CURRENT_KEY) {
            Ok(info) => info,
            Err(e) => {
                warn!("Ignoring unreadable persisted delegation: {}", e);
                None
            }
        };
        if let Some(info) = &cached {
            debug!(
                address = %info.proof.wallet_address,
                expiry = info.proof.expiry_timestamp,
                "Loaded persisted delegation"
            );
        }

        Self {
            db,
            wallet_verifier,
            clock,
            cached: Mutex::new(cached),
            verifications: AtomicU64::new(0),
        }
    }

    fn current(&self) -> Option<DelegationInfo> {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Delegates signing authority from a wallet to a fresh session key.
    ///
    /// `sign` is the wallet prompt: it receives the authorization statement
    /// and resolves to the wallet signature. Returns false, leaving any
    /// previous delegation in place, if the wallet refuses, the returned
    /// signature does not verify, or the record cannot be persisted; use
    /// [`try_delegate`](Self::try_delegate) to learn which.
    pub async fn delegate<F, Fut, E>(
        &self,
        address: &str,
        wallet_type: WalletType,
        duration: DelegationDuration,
        sign: F,
    ) -> bool
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = std::result::Result<String, E>>,
        E: fmt::Display,
    {
        match self.try_delegate(address, wallet_type, duration, sign).await {
            Ok(_) => true,
            Err(e) => {
                warn!(address, %wallet_type, "Delegation not created: {}", e);
                false
            }
        }
    }

    /// Delegates signing authority, returning the new status on success.
    ///
    /// Fails with [`OpchanError::WalletRejected`] when the prompt is refused
    /// or its signature does not verify against `address`, and with
    /// [`OpchanError::Storage`] when the record cannot be persisted.
    pub async fn try_delegate<F, Fut, E>(
        &self,
        address: &str,
        wallet_type: WalletType,
        duration: DelegationDuration,
        sign: F,
    ) -> Result<DelegationStatus>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = std::result::Result<String, E>>,
        E: fmt::Display,
    {
        let keypair = KeyPair::generate();
        let browser_public_key = keypair.public_key_hex();
        let nonce = generate_nonce();
        let expiry_timestamp = self.clock.now_millis() + duration.as_millis();
        let auth_message =
            create_auth_message(address, &browser_public_key, expiry_timestamp, &nonce);

        let wallet_signature = sign(auth_message.clone())
            .await
            .map_err(OpchanError::wallet_rejected)?;

        if !self
            .wallet_verifier
            .verify(wallet_type, address, &auth_message, &wallet_signature)
        {
            return Err(OpchanError::wallet_rejected(format!(
                "signature does not verify for {} wallet {}",
                wallet_type, address
            )));
        }

        let info = DelegationInfo {
            proof: DelegationProof {
                auth_message,
                wallet_signature,
                expiry_timestamp,
                wallet_address: address.to_string(),
                wallet_type,
            },
            browser_public_key,
            browser_private_key: keypair.private_key_hex().to_string(),
            nonce,
        };

        self.db.put(Table::Delegation.name(), CURRENT_KEY, &info)?;

        info!(
            address,
            %wallet_type,
            expiry = expiry_timestamp,
            "Created delegation"
        );
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = Some(info);
        Ok(self.status())
    }

    /// Signs a message with the active session key.
    ///
    /// Returns `None` without a usable delegation; use
    /// [`try_sign_message`](Self::try_sign_message) to learn which.
    pub fn sign_message(&self, unsigned: UnsignedMessage) -> Option<OpchanMessage> {
        match self.try_sign_message(unsigned) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!("Not signing message: {}", e);
                None
            }
        }
    }

    /// Signs a message, distinguishing a missing delegation from an expired one.
    ///
    /// The message's author must be the delegating wallet; anything else is
    /// [`OpchanError::InvalidInput`].
    pub fn try_sign_message(&self, unsigned: UnsignedMessage) -> Result<OpchanMessage> {
        let info = self.current().ok_or(OpchanError::NoDelegation)?;
        if !info.proof.is_live(self.clock.now_millis()) {
            return Err(OpchanError::DelegationExpired {
                expired_at: info.proof.expiry_timestamp,
            });
        }
        if !info.proof.authorizes(&unsigned.author) {
            return Err(OpchanError::invalid_input(format!(
                "author {} is not the delegating wallet {}",
                unsigned.author, info.proof.wallet_address
            )));
        }

        let keypair = KeyPair::from_private_hex(&info.browser_private_key)?;
        let signature = keypair.sign_hex(&unsigned.signing_bytes()?);

        Ok(OpchanMessage {
            unsigned,
            signature,
            browser_pub_key: info.browser_public_key.clone(),
            delegation_proof: info.proof.clone(),
        })
    }

    /// Verifies a message's full authorization chain.
    ///
    /// 1. The author is the wallet that issued the delegation.
    /// 2. The session signature covers the message minus its signature fields.
    /// 3. The wallet signed the proof's statement, and the statement names
    ///    exactly this session key, wallet, and expiry.
    /// 4. The proof has not expired.
    pub fn verify(&self, message: &OpchanMessage) -> bool {
        self.verifications.fetch_add(1, Ordering::Relaxed);

        if !message.delegation_proof.authorizes(&message.unsigned.author) {
            debug!(
                id = message.id(),
                author = %message.unsigned.author,
                address = %message.delegation_proof.wallet_address,
                "Author is not the delegating wallet"
            );
            return false;
        }
        let signing_bytes = match message.unsigned.signing_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(id = message.id(), "Cannot render signing bytes: {}", e);
                return false;
            }
        };
        if !verify_signature(&message.browser_pub_key, &signing_bytes, &message.signature) {
            debug!(id = message.id(), "Session signature does not verify");
            return false;
        }

        self.verify_proof(&message.delegation_proof, &message.browser_pub_key)
    }

    /// Verifies a delegation proof for a session key (stages 3 and 4 of [`verify`](Self::verify)).
    pub fn verify_proof(&self, proof: &DelegationProof, browser_public_key: &str) -> bool {
        if !proof.statement_matches(browser_public_key) {
            debug!(
                address = %proof.wallet_address,
                "Delegation statement does not match its proof"
            );
            return false;
        }
        if !self.wallet_verifier.verify(
            proof.wallet_type,
            &proof.wallet_address,
            &proof.auth_message,
            &proof.wallet_signature,
        ) {
            return false;
        }
        if !proof.is_live(self.clock.now_millis()) {
            debug!(
                address = %proof.wallet_address,
                expiry = proof.expiry_timestamp,
                "Delegation expired"
            );
            return false;
        }
        true
    }

    /// Returns the status of the current delegation.
    pub fn status(&self) -> DelegationStatus {
        self.status_inner(None)
    }

    /// Returns the status, treating a delegation for another wallet as invalid.
    pub fn status_for(&self, address: &str, wallet_type: WalletType) -> DelegationStatus {
        self.status_inner(Some((address, wallet_type)))
    }

    fn status_inner(&self, wallet: Option<(&str, WalletType)>) -> DelegationStatus {
        let Some(info) = self.current() else {
            return DelegationStatus::default();
        };

        let now = self.clock.now_millis();
        let belongs = wallet.map_or(true, |(address, wallet_type)| {
            info.proof.wallet_address == address && info.proof.wallet_type == wallet_type
        });
        let is_valid = belongs && info.proof.is_live(now);

        DelegationStatus {
            has_delegation: true,
            is_valid,
            time_remaining: is_valid.then(|| info.proof.expiry_timestamp - now),
            public_key: Some(info.browser_public_key.clone()),
            address: Some(info.proof.wallet_address.clone()),
            wallet_type: Some(info.proof.wallet_type),
            proof: Some(info.proof.clone()),
        }
    }

    /// Erases the local delegation.
    ///
    /// Messages already signed under it stay verifiable by anyone holding them.
    pub fn clear(&self) -> Result<()> {
        self.db.delete(Table::Delegation.name(), CURRENT_KEY)?;
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
        info!("Cleared delegation");
        Ok(())
    }

    /// Number of messages passed to [`verify`](Self::verify) so far.
    pub fn verifications_performed(&self) -> u64 {
        self.verifications.load(Ordering::Relaxed)
    }
}
