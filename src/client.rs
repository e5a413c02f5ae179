//! Application root owning every sync component.
//!
//! ## Usage
//!
//! ```ignore
//! let network = MemoryNetwork::new();
//! let (transport, events) = network.join(DEFAULT_CONTENT_TOPIC);
//! let client = OpchanClient::builder(ClientConfig::new("./data"))
//!     .open(Arc::new(transport), events)?;
//!
//! client.delegate("0xabc...", WalletType::Ethereum, DelegationDuration::SevenDays, |msg| wallet.sign(msg)).await;
//! let ticket = client.send_message(unsigned).await?;
//! ticket.outcome().await?;
//! ```

use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::crypto::{DefaultWalletVerifier, WalletType, WalletVerifier};
use crate::delegation::{DelegationDuration, DelegationManager, DelegationStatus};
use crate::error::Result;
use crate::message::{MessageValidator, UnsignedMessage};
use crate::messaging::ReliableMessaging;
use crate::storage::{open_database, RocksDbHandle};
use crate::store::LocalStore;
use crate::sync::{MessageService, SendTicket};
use crate::transport::{Codec, JsonCodec, Transport, TransportEvent};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Builder for [`OpchanClient`].
#[derive(Debug)]
pub struct OpchanClientBuilder {
    config: ClientConfig,
    wallet_verifier: Arc<dyn WalletVerifier>,
    clock: Arc<dyn Clock>,
    codec: Option<Arc<dyn Codec>>,
}

impl OpchanClientBuilder {
    /// Replaces the wallet signature verifier.
    pub fn wallet_verifier(mut self, verifier: Arc<dyn WalletVerifier>) -> Self {
        self.wallet_verifier = verifier;
        self
    }

    /// Replaces the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the frame codec (defaults to JSON on the configured topic).
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Opens the database, hydrates the store, and starts the event loops.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(
        self,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<OpchanClient> {
        self.config.validate()?;

        let db = Arc::new(open_database(&self.config.data_dir, &self.config.rocksdb)?);
        let delegation = Arc::new(DelegationManager::new(
            db.clone(),
            self.wallet_verifier,
            self.clock.clone(),
        ));
        let validator = MessageValidator::with_limits(
            delegation.clone(),
            self.clock.clone(),
            self.config.validator_limits(),
        );
        let store = Arc::new(LocalStore::open(db.clone(), validator.clone(), self.clock.clone())?);

        let codec: Arc<dyn Codec> = match self.codec {
            Some(codec) => codec,
            None => Arc::new(JsonCodec::new(self.config.content_topic.clone())),
        };
        let messaging = Arc::new(ReliableMessaging::new(transport, codec));
        let service = Arc::new(MessageService::new(
            delegation.clone(),
            store.clone(),
            messaging.clone(),
        ));

        // Subscribe to inbound messages before any frame can be processed.
        let inbound_task = service.start();
        let events_task = tokio::spawn(messaging.clone().run(events));

        info!(data_dir = ?self.config.data_dir, topic = %self.config.content_topic, "Opened opchan client");
        Ok(OpchanClient {
            config: self.config,
            db,
            delegation,
            validator,
            store,
            messaging,
            service,
            tasks: vec![inbound_task, events_task],
        })
    }
}

/// A fully wired client: delegation, validation, store, and sync.
pub struct OpchanClient {
    config: ClientConfig,
    db: Arc<RocksDbHandle>,
    delegation: Arc<DelegationManager>,
    validator: MessageValidator,
    store: Arc<LocalStore>,
    messaging: Arc<ReliableMessaging>,
    service: Arc<MessageService>,
    tasks: Vec<JoinHandle<()>>,
}

impl fmt::Debug for OpchanClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpchanClient")
            .field("data_dir", &self.config.data_dir)
            .field("content_topic", &self.config.content_topic)
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

impl OpchanClient {
    /// Starts building a client with the default wallet verifier and system clock.
    ///
    /// # Wallet support
    ///
    /// The default [`DefaultWalletVerifier`] cannot verify Bitcoin bech32
    /// addresses (`bc1q...` segwit, `bc1p...` taproot, and their `tb1`
    /// testnet forms): those wallets fail to delegate, and messages from
    /// them are rejected on receipt. Taproot is the default for ordinals
    /// wallets. Install a BIP-322 capable verifier with
    /// [`OpchanClientBuilder::wallet_verifier`] to accept them.
    pub fn builder(config: ClientConfig) -> OpchanClientBuilder {
        OpchanClientBuilder {
            config,
            wallet_verifier: Arc::new(DefaultWalletVerifier),
            clock: Arc::new(SystemClock),
            codec: None,
        }
    }

    /// Configuration the client was opened with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Delegation lifecycle.
    pub fn delegation(&self) -> &Arc<DelegationManager> {
        &self.delegation
    }

    /// Message validator.
    pub fn validator(&self) -> &MessageValidator {
        &self.validator
    }

    /// Local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Delivery tracking layer.
    pub fn messaging(&self) -> &Arc<ReliableMessaging> {
        &self.messaging
    }

    /// Sync orchestration.
    pub fn service(&self) -> &Arc<MessageService> {
        &self.service
    }

    /// Delegates signing to a fresh session key. See [`DelegationManager::delegate`].
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
        self.delegation
            .delegate(address, wallet_type, duration, sign)
            .await
    }

    /// Delegates, reporting why it failed. See [`DelegationManager::try_delegate`].
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
        self.delegation
            .try_delegate(address, wallet_type, duration, sign)
            .await
    }

    /// Current delegation status.
    pub fn delegation_status(&self) -> DelegationStatus {
        self.delegation.status()
    }

    /// Signs, stores, and sends a message. See [`MessageService::send_message`].
    pub async fn send_message(&self, unsigned: UnsignedMessage) -> Result<SendTicket> {
        self.service.send_message(unsigned).await
    }

    /// True when the transport reports itself usable.
    pub fn is_ready(&self) -> bool {
        self.messaging.is_ready()
    }

    /// Stops the background event loops and waits for them to release the database.
    pub async fn close(mut self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            // Cancellation is the expected outcome.
            let _ = task.await;
        }
        info!(data_dir = ?self.config.data_dir, "Closed opchan client");
    }
}

impl Drop for OpchanClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
