//! Shared helpers for integration tests.

#![allow(dead_code)]

use base64::Engine;
use opchan::clock::{Clock, ManualClock};
use opchan::crypto::wallet::{
    bitcoin_message_digest, bitcoin_p2pkh_address, ethereum_address, ethereum_message_digest,
};
use opchan::crypto::{KeyPair, WalletType, WalletVerifier};
use opchan::delegation::{
    create_auth_message, generate_nonce, DelegationDuration, DelegationManager, DelegationProof,
};
use opchan::message::{MessageValidator, OpchanMessage, UnsignedMessage};
use opchan::storage::{open_database, RocksDbConfig, RocksDbHandle};
use opchan::store::LocalStore;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use std::sync::Arc;
use tempfile::TempDir;

/// A fixed point in time all tests start from.
pub const T0: u64 = 1_750_000_000_000;

/// Installs a test-friendly tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("opchan=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A real secp256k1 wallet able to sign like MetaMask or a Bitcoin wallet.
pub struct TestWallet {
    secret: SecretKey,
    public: PublicKey,
}

impl TestWallet {
    /// Creates a deterministic wallet from a non-zero seed byte.
    pub fn new(seed: u8) -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[seed; 32]).expect("valid secret key");
        let public = PublicKey::from_secret_key(&secp, &secret);
        Self { secret, public }
    }

    pub fn eth_address(&self) -> String {
        ethereum_address(&self.public)
    }

    pub fn btc_address(&self) -> String {
        bitcoin_p2pkh_address(&self.public, true)
    }

    pub fn address(&self, wallet_type: WalletType) -> String {
        match wallet_type {
            WalletType::Ethereum => self.eth_address(),
            WalletType::Bitcoin => self.btc_address(),
        }
    }

    /// `personal_sign`: 0x-prefixed hex `r || s || v` with `v` in {27, 28}.
    pub fn sign_eth(&self, message: &str) -> String {
        let secp = Secp256k1::new();
        let digest = Message::from_digest(ethereum_message_digest(message));
        let (recovery_id, compact) = secp
            .sign_ecdsa_recoverable(&digest, &self.secret)
            .serialize_compact();
        let mut bytes = compact.to_vec();
        bytes.push(recovery_id.to_i32() as u8 + 27);
        format!("0x{}", hex::encode(bytes))
    }

    /// BIP-137 compressed P2PKH signature, base64-encoded.
    pub fn sign_btc(&self, message: &str) -> String {
        let secp = Secp256k1::new();
        let digest = Message::from_digest(bitcoin_message_digest(message));
        let (recovery_id, compact) = secp
            .sign_ecdsa_recoverable(&digest, &self.secret)
            .serialize_compact();
        let mut bytes = vec![31 + recovery_id.to_i32() as u8];
        bytes.extend_from_slice(&compact);
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    pub fn sign(&self, wallet_type: WalletType, message: &str) -> String {
        match wallet_type {
            WalletType::Ethereum => self.sign_eth(message),
            WalletType::Bitcoin => self.sign_btc(message),
        }
    }

    /// Delegates from this wallet through `manager`.
    pub async fn delegate(
        &self,
        manager: &DelegationManager,
        wallet_type: WalletType,
        duration: DelegationDuration,
    ) -> bool {
        let address = self.address(wallet_type);
        manager
            .delegate(&address, wallet_type, duration, |statement| {
                let signature = self.sign(wallet_type, &statement);
                async move { Ok::<_, String>(signature) }
            })
            .await
    }
}

/// Accepts a wallet signature iff it reads `signed-by:{address}`.
///
/// Lets store tests use short literal addresses like `0xB`.
#[derive(Debug)]
pub struct LabelVerifier;

impl WalletVerifier for LabelVerifier {
    fn verify(&self, _: WalletType, address: &str, _: &str, signature: &str) -> bool {
        signature == format!("signed-by:{}", address)
    }
}

/// A store opened over a temporary database.
pub struct StoreFixture {
    pub db: Arc<RocksDbHandle>,
    pub clock: Arc<ManualClock>,
    pub store: LocalStore,
    pub delegations: Arc<DelegationManager>,
}

impl StoreFixture {
    pub fn open(temp: &TempDir, clock: Arc<ManualClock>) -> Self {
        let db = Arc::new(open_database(temp.path(), &RocksDbConfig::default()).unwrap());
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let delegations = Arc::new(DelegationManager::new(
            db.clone(),
            Arc::new(LabelVerifier),
            dyn_clock.clone(),
        ));
        let validator = MessageValidator::new(delegations.clone(), dyn_clock.clone());
        let store = LocalStore::open(db.clone(), validator, dyn_clock).unwrap();
        Self {
            db,
            clock,
            store,
            delegations,
        }
    }
}

/// Creates a delegation for a literal address and returns its manager.
///
/// Each author gets its own manager (and database) so messages from several
/// authors can be produced in one test.
pub async fn author(address: &str, clock: Arc<ManualClock>) -> (Arc<DelegationManager>, TempDir) {
    let temp = TempDir::new().unwrap();
    let db = Arc::new(open_database(temp.path(), &RocksDbConfig::default()).unwrap());
    let manager = Arc::new(DelegationManager::new(db, Arc::new(LabelVerifier), clock));
    let label = format!("signed-by:{}", address);
    assert!(
        manager
            .delegate(
                address,
                WalletType::Ethereum,
                DelegationDuration::SevenDays,
                |_statement| async move { Ok::<_, String>(label) },
            )
            .await
    );
    (manager, temp)
}

/// Signs a message as `manager`'s delegation.
pub fn sign(manager: &DelegationManager, unsigned: UnsignedMessage) -> OpchanMessage {
    manager
        .sign_message(unsigned)
        .expect("delegation should be active")
}

/// Signs `unsigned` with a fresh session key that `delegator` genuinely
/// authorized under [`LabelVerifier`], whatever author the message names.
pub fn sign_as_delegator(delegator: &str, unsigned: UnsignedMessage) -> OpchanMessage {
    let session = KeyPair::generate();
    let browser_pub_key = session.public_key_hex();
    let expiry_timestamp = unsigned.timestamp + 7 * opchan::constants::DAY_MS;
    let delegation_proof = DelegationProof {
        auth_message: create_auth_message(
            delegator,
            &browser_pub_key,
            expiry_timestamp,
            &generate_nonce(),
        ),
        wallet_signature: format!("signed-by:{}", delegator),
        expiry_timestamp,
        wallet_address: delegator.to_string(),
        wallet_type: WalletType::Ethereum,
    };
    OpchanMessage {
        signature: session.sign_hex(&unsigned.signing_bytes().unwrap()),
        browser_pub_key,
        delegation_proof,
        unsigned,
    }
}
