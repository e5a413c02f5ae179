//! # opchan
//!
//! Client-side trust and synchronization core for a peer-to-peer forum.
//!
//! Untrusted peers broadcast signed forum messages (cells, posts, comments,
//! votes, moderation actions, profile updates) over a pub/sub transport.
//! This crate decides which of them to trust and merges them into a local
//! view without any server.
//!
//! ## Layers
//!
//! - **Delegation**: a wallet signs one statement authorizing an ephemeral
//!   Ed25519 session key; the session key signs every message, and every
//!   message carries the wallet's proof.
//! - **Validation**: a cheap structural gate, then the full signature chain.
//! - **Store**: idempotent, last-write-wins per logical key, with a pending
//!   set for unacknowledged local sends. Backed by RocksDB.
//! - **Messaging**: content-addressed frame ids and per-frame delivery status.
//! - **Sync**: optimistic local writes on send, store admission on receive.
//!
//! ## Cryptographic Algorithms
//!
//! - **Session signatures**: Ed25519
//! - **Ethereum wallets**: EIP-191 personal messages, secp256k1 recovery
//! - **Bitcoin wallets**: BIP-137 signed messages (P2PKH, P2SH-P2WPKH)
//! - **Frame ids**: SHA3-256
//!
//! Bech32 Bitcoin addresses (`bc1...`, including taproot) are not verifiable
//! by the default wallet verifier; see [`OpchanClient::builder`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use opchan::message::{MessagePayload, PostPayload, UnsignedMessage};
//! use opchan::transport::MemoryNetwork;
//! use opchan::{ClientConfig, DelegationDuration, OpchanClient, WalletType};
//! use std::sync::Arc;
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("./opchan_data");
//! let network = MemoryNetwork::new();
//! let (transport, events) = network.join(&config.content_topic);
//! let client = OpchanClient::builder(config).open(Arc::new(transport), events)?;
//!
//! let delegated = client
//!     .delegate("0xabc", WalletType::Ethereum, DelegationDuration::SevenDays, |statement| async move {
//!         // Hand `statement` to the wallet for signing.
//!         Err::<String, _>(format!("no wallet to sign {:?}", statement))
//!     })
//!     .await;
//!
//! if delegated {
//!     let post = UnsignedMessage::new(
//!         "post-1",
//!         "0xabc",
//!         opchan::clock::current_timestamp_millis(),
//!         MessagePayload::Post(PostPayload {
//!             cell_id: "cell-1".into(),
//!             title: "Hello".into(),
//!             content: "First post".into(),
//!         }),
//!     );
//!     client.send_message(post).await?.outcome().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod clock;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod delegation;
pub mod error;
pub mod message;
pub mod messaging;
pub mod storage;
pub mod store;
pub mod sync;
pub mod transport;

pub use client::{OpchanClient, OpchanClientBuilder};
pub use config::ClientConfig;
pub use crypto::WalletType;
pub use delegation::{DelegationDuration, DelegationManager, DelegationStatus};
pub use error::{OpchanError, Result};
pub use message::{MessageValidator, OpchanMessage};
pub use store::LocalStore;
pub use sync::MessageService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
