//! Wiring between the store and the network.
//!
//! Outbound: sign, apply locally, mark pending, send; the acknowledgement
//! clears the pending mark. Inbound: apply, and on first acceptance clear
//! any pending mark for the id and notify subscribers.

use crate::delegation::DelegationManager;
use crate::error::{OpchanError, Result};
use crate::message::{OpchanMessage, UnsignedMessage};
use crate::messaging::ReliableMessaging;
use crate::store::{ListenerId, Listeners, LocalStore};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A locally originated message in flight.
#[derive(Debug)]
pub struct SendTicket {
    message: OpchanMessage,
    delivery_id: String,
    outcome: oneshot::Receiver<Result<()>>,
}

impl SendTicket {
    /// The signed message, already visible in the local store.
    pub fn message(&self) -> &OpchanMessage {
        &self.message
    }

    /// Transport-level id of the frame.
    pub fn delivery_id(&self) -> &str {
        &self.delivery_id
    }

    /// Waits for acknowledgement or the transport's error.
    ///
    /// On error the message stays pending so it can be retried.
    pub async fn outcome(self) -> Result<()> {
        match self.outcome.await {
            Ok(result) => result,
            Err(_) => Err(OpchanError::transport("delivery task ended without a result")),
        }
    }
}

/// Orchestrates sends and receives for one client.
#[derive(Debug)]
pub struct MessageService {
    delegation: Arc<DelegationManager>,
    store: Arc<LocalStore>,
    messaging: Arc<ReliableMessaging>,
    message_listeners: Listeners<OpchanMessage>,
}

impl MessageService {
    /// Creates the service.
    pub fn new(
        delegation: Arc<DelegationManager>,
        store: Arc<LocalStore>,
        messaging: Arc<ReliableMessaging>,
    ) -> Self {
        Self {
            delegation,
            store,
            messaging,
            message_listeners: Listeners::default(),
        }
    }

    /// Signs and sends a message.
    ///
    /// The message is applied to the local store and marked pending before
    /// it reaches the transport. Fails without touching the store if there is
    /// no usable delegation. If the transport refuses the frame outright the
    /// error is returned and the message stays pending.
    pub async fn send_message(&self, unsigned: UnsignedMessage) -> Result<SendTicket> {
        let message = self.delegation.try_sign_message(unsigned)?;
        let id = message.id().to_string();

        if !self.store.apply_message(&message) {
            debug!(id = %id, "Outgoing message already in store");
        }
        self.store.mark_pending(&id);

        let handle = self.messaging.send_message(&message).await?;
        let delivery_id = handle.message_id().to_string();

        let (outcome_tx, outcome_rx) = oneshot::channel();
        // Weak so an unacknowledged send does not hold the database open.
        let store = Arc::downgrade(&self.store);
        tokio::spawn(async move {
            let outcome = handle.outcome().await;
            match (&outcome, store.upgrade()) {
                (Ok(()), Some(store)) => {
                    store.clear_pending(&id);
                    store.touch_last_sync();
                    debug!(id = %id, "Message acknowledged");
                }
                (Ok(()), None) => debug!(id = %id, "Acknowledged after store closed"),
                (Err(e), _) => warn!(id = %id, "Message left pending: {}", e),
            }
            // The caller may have dropped the ticket.
            let _ = outcome_tx.send(outcome);
        });

        Ok(SendTicket {
            message,
            delivery_id,
            outcome: outcome_rx,
        })
    }

    /// Feeds one received message into the store.
    ///
    /// Returns true and notifies subscribers only on first acceptance.
    pub fn handle_inbound(&self, message: &OpchanMessage) -> bool {
        if !self.store.apply_message(message) {
            return false;
        }
        self.store.clear_pending(message.id());
        self.message_listeners.notify(message);
        true
    }

    /// Registers a callback for newly accepted inbound messages.
    pub fn on_message<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&OpchanMessage) + Send + Sync + 'static,
    {
        self.message_listeners.add(callback)
    }

    /// Unregisters a message callback.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.message_listeners.remove(id)
    }

    /// Starts consuming inbound messages from the messaging layer.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let mut inbound = self.messaging.subscribe();
        let service = self.clone();
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                service.handle_inbound(&message);
            }
            info!("Inbound message stream closed");
        })
    }
}
