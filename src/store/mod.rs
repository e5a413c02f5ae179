//! Local-first message store.
//!
//! The in-memory cache is authoritative; RocksDB is best-effort durability
//! for warm restarts. Every accepted message is:
//!
//! 1. Validated (structure and signatures).
//! 2. Deduplicated by `type:id:timestamp`.
//! 3. Written to its logical key if it is strictly newer than what is there.
//! 4. Persisted, with failures logged and otherwise ignored.
//!
//! Pending (sent but unacknowledged) ids are tracked alongside and persisted
//! as `pending:{id}` markers so a restart does not lose in-flight state.
//!
//! All mutation happens under a single mutex; nothing awaits while holding it.

mod extras;
pub mod listeners;
pub mod records;

pub use listeners::{ListenerId, Listeners};
pub use records::{Bookmark, BookmarkType, PendingChange, StoreStats, UserAuth, UserIdentity};

use crate::clock::Clock;
use crate::error::Result;
use crate::message::{MessagePayload, MessageValidator, OpchanMessage, UserProfilePayload};
use crate::storage::{RocksDbHandle, Table};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace, warn};

const LAST_SYNC_KEY: &[u8] = b"lastSync";
const PENDING_PREFIX: &str = "pending:";

fn pending_key(id: &str) -> Vec<u8> {
    format!("{}{}", PENDING_PREFIX, id).into_bytes()
}

/// In-memory view of the forum.
#[derive(Debug, Default)]
struct Cache {
    cells: HashMap<String, OpchanMessage>,
    posts: HashMap<String, OpchanMessage>,
    comments: HashMap<String, OpchanMessage>,
    votes: HashMap<String, OpchanMessage>,
    moderations: HashMap<String, OpchanMessage>,
    identities: HashMap<String, UserIdentity>,
    bookmarks: HashMap<String, Bookmark>,
    processed: HashSet<String>,
    pending: HashSet<String>,
    last_sync: Option<u64>,
}

impl Cache {
    fn table_mut(&mut self, table: Table) -> Option<&mut HashMap<String, OpchanMessage>> {
        match table {
            Table::Cells => Some(&mut self.cells),
            Table::Posts => Some(&mut self.posts),
            Table::Comments => Some(&mut self.comments),
            Table::Votes => Some(&mut self.votes),
            Table::Moderations => Some(&mut self.moderations),
            _ => None,
        }
    }
}

/// Table each message kind is stored in, or `None` for profile updates,
/// which feed the derived identity table instead.
fn message_table(payload: &MessagePayload) -> Option<Table> {
    match payload {
        MessagePayload::Cell(_) => Some(Table::Cells),
        MessagePayload::Post(_) => Some(Table::Posts),
        MessagePayload::Comment(_) => Some(Table::Comments),
        MessagePayload::Vote(_) => Some(Table::Votes),
        MessagePayload::Moderate(_) => Some(Table::Moderations),
        MessagePayload::UserProfileUpdate(_) => None,
    }
}

const MESSAGE_TABLES: [Table; 5] = [
    Table::Cells,
    Table::Posts,
    Table::Comments,
    Table::Votes,
    Table::Moderations,
];

/// Idempotent, last-write-wins message cache with persistence.
pub struct LocalStore {
    db: Arc<RocksDbHandle>,
    validator: MessageValidator,
    clock: Arc<dyn Clock>,
    cache: Mutex<Cache>,
    pending_listeners: Listeners<PendingChange>,
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("stats", &self.stats())
            .field("pending_listeners", &self.pending_listeners)
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    /// Opens the store, hydrating the cache from every persisted table.
    ///
    /// Unreadable records are logged and skipped; database errors fail the open.
    pub fn open(
        db: Arc<RocksDbHandle>,
        validator: MessageValidator,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let store = Self {
            db,
            validator,
            clock,
            cache: Mutex::new(Cache::default()),
            pending_listeners: Listeners::default(),
        };
        store.hydrate()?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hydrate(&self) -> Result<()> {
        let mut cache = self.lock();

        for table in MESSAGE_TABLES {
            let mut loaded = Vec::new();
            self.db.iterate_all(table.name(), |key, value| {
                match serde_json::from_slice::<OpchanMessage>(value) {
                    Ok(message) => loaded.push((String::from_utf8_lossy(key).into_owned(), message)),
                    Err(e) => warn!(table = table.name(), "Skipping unreadable message: {}", e),
                }
                true
            })?;
            for (key, message) in loaded {
                cache.processed.insert(message.dedup_key());
                if let Some(map) = cache.table_mut(table) {
                    map.insert(key, message);
                }
            }
        }

        let mut identities = Vec::new();
        self.db
            .iterate_all(Table::UserIdentities.name(), |_, value| {
                match RocksDbHandle::decode::<UserIdentity>(value) {
                    Ok(identity) => identities.push(identity),
                    Err(e) => warn!("Skipping unreadable identity: {}", e),
                }
                true
            })?;
        for identity in identities {
            cache.identities.insert(identity.address.clone(), identity);
        }

        let mut bookmarks = Vec::new();
        self.db.iterate_all(Table::Bookmarks.name(), |_, value| {
            match RocksDbHandle::decode::<Bookmark>(value) {
                Ok(bookmark) => bookmarks.push(bookmark),
                Err(e) => warn!("Skipping unreadable bookmark: {}", e),
            }
            true
        })?;
        for bookmark in bookmarks {
            cache.bookmarks.insert(bookmark.id.clone(), bookmark);
        }

        let mut pending = Vec::new();
        self.db
            .prefix_iterate(Table::Meta.name(), PENDING_PREFIX.as_bytes(), |key, _| {
                pending.push(String::from_utf8_lossy(&key[PENDING_PREFIX.len()..]).into_owned());
                true
            })?;
        cache.pending.extend(pending);

        cache.last_sync = self.db.get::<u64>(Table::Meta.name(), LAST_SYNC_KEY)?;

        info!(
            cells = cache.cells.len(),
            posts = cache.posts.len(),
            comments = cache.comments.len(),
            votes = cache.votes.len(),
            moderations = cache.moderations.len(),
            identities = cache.identities.len(),
            pending = cache.pending.len(),
            "Hydrated local store"
        );
        Ok(())
    }

    // =========================================================================
    // Message application
    // =========================================================================

    /// Applies a raw JSON message.
    ///
    /// Returns true only the first time a valid message is seen.
    pub fn apply_raw(&self, raw: &Value) -> bool {
        if !MessageValidator::has_required_fields(raw) {
            debug!(
                id = raw.get("id").and_then(serde_json::Value::as_str).unwrap_or("<none>"),
                kind = raw.get("type").and_then(serde_json::Value::as_str).unwrap_or("<none>"),
                has_signature = raw.get("signature").is_some(),
                "Rejected message: missing or mistyped fields"
            );
            return false;
        }
        match OpchanMessage::from_value(raw.clone()) {
            Ok(message) => self.apply_message(&message),
            Err(e) => {
                debug!("Rejected message: {}", e);
                false
            }
        }
    }

    /// Applies a typed message.
    ///
    /// Returns false if the message does not verify or is an exact replay.
    /// Otherwise the message is recorded as seen and stored under its logical
    /// key if it is newer than the current entry, and true is returned.
    pub fn apply_message(&self, message: &OpchanMessage) -> bool {
        if !self.validator.is_valid(message) {
            return false;
        }

        let now = self.clock.now_millis();
        let mut cache = self.lock();

        if !cache.processed.insert(message.dedup_key()) {
            trace!(id = message.id(), kind = %message.kind(), "Duplicate message");
            return false;
        }

        let key = message.logical_key();
        match message.payload() {
            MessagePayload::UserProfileUpdate(profile) => {
                self.store_profile(&mut cache, message, profile);
            }
            payload => {
                if let Some(table) = message_table(payload) {
                    self.store_latest(&mut cache, table, key, message);
                }
            }
        }

        self.advance_last_sync(&mut cache, now);
        true
    }

    fn store_latest(&self, cache: &mut Cache, table: Table, key: String, message: &OpchanMessage) {
        let Some(map) = cache.table_mut(table) else {
            return;
        };
        if let Some(existing) = map.get(&key) {
            if message.timestamp() <= existing.timestamp() {
                debug!(
                    id = message.id(),
                    key = %key,
                    "Keeping newer {} entry", table.name()
                );
                return;
            }
        }

        match serde_json::to_vec(message) {
            Ok(bytes) => self.persist(table, &key, self.db.put_raw(table.name(), key.as_bytes(), &bytes)),
            Err(e) => warn!(id = message.id(), "Failed to encode message for persistence: {}", e),
        }
        debug!(id = message.id(), kind = %message.kind(), key = %key, "Stored message");
        map.insert(key, message.clone());
    }

    fn store_profile(&self, cache: &mut Cache, message: &OpchanMessage, profile: &UserProfilePayload) {
        let address = message.author();
        let existing = cache.identities.get(address);
        if existing.is_some_and(|identity| message.timestamp() <= identity.last_updated) {
            debug!(id = message.id(), address, "Keeping newer profile");
            return;
        }

        let identity = UserIdentity {
            address: address.to_string(),
            call_sign: profile.call_sign.clone(),
            display_preference: profile.display_preference,
            ens_name: existing.and_then(|identity| identity.ens_name.clone()),
            ordinal_details: existing.and_then(|identity| identity.ordinal_details.clone()),
            last_updated: message.timestamp(),
        };
        self.persist(
            Table::UserIdentities,
            address,
            self.db
                .put(Table::UserIdentities.name(), address.as_bytes(), &identity),
        );
        debug!(id = message.id(), address, "Updated profile");
        cache.identities.insert(address.to_string(), identity);
    }

    /// Merges externally resolved names into a user's identity.
    ///
    /// Profile fields and `last_updated` are left alone, so a later profile
    /// update still applies.
    pub fn update_identity_resolution(
        &self,
        address: &str,
        ens_name: Option<String>,
        ordinal_details: Option<String>,
    ) {
        let mut cache = self.lock();
        let identity = cache
            .identities
            .entry(address.to_string())
            .or_insert_with(|| UserIdentity::new(address));
        if ens_name.is_some() {
            identity.ens_name = ens_name;
        }
        if ordinal_details.is_some() {
            identity.ordinal_details = ordinal_details;
        }
        let result = self
            .db
            .put(Table::UserIdentities.name(), address.as_bytes(), &*identity);
        self.persist(Table::UserIdentities, address, result);
    }

    fn advance_last_sync(&self, cache: &mut Cache, now: u64) {
        let last_sync = cache.last_sync.map_or(now, |previous| previous.max(now));
        cache.last_sync = Some(last_sync);
        self.persist(
            Table::Meta,
            "lastSync",
            self.db.put(Table::Meta.name(), LAST_SYNC_KEY, &last_sync),
        );
    }

    /// Records local activity (e.g. an acknowledgement) in `last_sync`.
    pub fn touch_last_sync(&self) {
        let now = self.clock.now_millis();
        let mut cache = self.lock();
        self.advance_last_sync(&mut cache, now);
    }

    fn persist(&self, table: Table, key: &str, result: Result<()>) {
        if let Err(e) = result {
            warn!(table = table.name(), key, "Best-effort persistence failed: {}", e);
        }
    }

    // =========================================================================
    // Pending tracking
    // =========================================================================

    /// Marks a locally originated message as awaiting acknowledgement.
    pub fn mark_pending(&self, id: &str) {
        self.set_pending(id, true);
    }

    /// Clears the pending mark of a message.
    pub fn clear_pending(&self, id: &str) {
        self.set_pending(id, false);
    }

    fn set_pending(&self, id: &str, pending: bool) {
        let changed = {
            let mut cache = self.lock();
            let changed = if pending {
                cache.pending.insert(id.to_string())
            } else {
                cache.pending.remove(id)
            };
            if changed {
                let result = if pending {
                    self.db
                        .put(Table::Meta.name(), &pending_key(id), &self.clock.now_millis())
                } else {
                    self.db.delete(Table::Meta.name(), &pending_key(id))
                };
                self.persist(Table::Meta, id, result);
            }
            changed
        };

        if changed {
            trace!(id, pending, "Pending set changed");
            self.pending_listeners.notify(&PendingChange {
                id: id.to_string(),
                pending,
            });
        }
    }

    /// Returns true if the message is awaiting acknowledgement.
    pub fn is_pending(&self, id: &str) -> bool {
        self.lock().pending.contains(id)
    }

    /// Returns every pending id, sorted.
    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().pending.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Registers a callback for pending-set changes.
    ///
    /// Fires once per actual change; marking an already pending id is not a change.
    pub fn on_pending_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&PendingChange) + Send + Sync + 'static,
    {
        self.pending_listeners.add(callback)
    }

    /// Unregisters a pending-change callback.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.pending_listeners.remove(id)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns a cell by id.
    pub fn cell(&self, id: &str) -> Option<OpchanMessage> {
        self.lock().cells.get(id).cloned()
    }

    /// Returns a post by id.
    pub fn post(&self, id: &str) -> Option<OpchanMessage> {
        self.lock().posts.get(id).cloned()
    }

    /// Returns a comment by id.
    pub fn comment(&self, id: &str) -> Option<OpchanMessage> {
        self.lock().comments.get(id).cloned()
    }

    /// Returns the vote an author cast on a target.
    pub fn vote(&self, target_id: &str, author: &str) -> Option<OpchanMessage> {
        self.lock()
            .votes
            .get(&format!("{}:{}", target_id, author))
            .cloned()
    }

    /// Returns the moderation action applying to a target.
    pub fn moderation(&self, target_id: &str) -> Option<OpchanMessage> {
        self.lock().moderations.get(target_id).cloned()
    }

    /// Returns a user's identity.
    pub fn identity(&self, address: &str) -> Option<UserIdentity> {
        self.lock().identities.get(address).cloned()
    }

    /// Returns every cell, oldest first.
    pub fn cells(&self) -> Vec<OpchanMessage> {
        sorted_by_timestamp(self.lock().cells.values())
    }

    /// Returns the posts of a cell, oldest first.
    pub fn posts_in_cell(&self, cell_id: &str) -> Vec<OpchanMessage> {
        let cache = self.lock();
        sorted_by_timestamp(cache.posts.values().filter(|message| {
            matches!(message.payload(), MessagePayload::Post(post) if post.cell_id == cell_id)
        }))
    }

    /// Returns the comments on a post, oldest first.
    pub fn comments_on_post(&self, post_id: &str) -> Vec<OpchanMessage> {
        let cache = self.lock();
        sorted_by_timestamp(cache.comments.values().filter(|message| {
            matches!(message.payload(), MessagePayload::Comment(comment) if comment.post_id == post_id)
        }))
    }

    /// Returns the current votes on a target, oldest first.
    pub fn votes_for(&self, target_id: &str) -> Vec<OpchanMessage> {
        let cache = self.lock();
        sorted_by_timestamp(cache.votes.values().filter(|message| {
            matches!(message.payload(), MessagePayload::Vote(vote) if vote.target_id == target_id)
        }))
    }

    /// Local time of the last accepted message or acknowledgement.
    pub fn last_sync(&self) -> Option<u64> {
        self.lock().last_sync
    }

    /// Entry counts of the cache.
    pub fn stats(&self) -> StoreStats {
        let cache = self.lock();
        StoreStats {
            cells: cache.cells.len(),
            posts: cache.posts.len(),
            comments: cache.comments.len(),
            votes: cache.votes.len(),
            moderations: cache.moderations.len(),
            identities: cache.identities.len(),
            bookmarks: cache.bookmarks.len(),
            pending: cache.pending.len(),
            processed: cache.processed.len(),
        }
    }

    /// Drops every cached entry and every persisted table.
    ///
    /// Pending listeners are not notified.
    pub fn clear(&self) -> Result<()> {
        let mut cache = self.lock();
        *cache = Cache::default();
        let deleted = self.db.clear_all()?;
        info!(records_deleted = deleted, "Cleared local store");
        Ok(())
    }
}

fn sorted_by_timestamp<'a>(messages: impl Iterator<Item = &'a OpchanMessage>) -> Vec<OpchanMessage> {
    let mut sorted: Vec<OpchanMessage> = messages.cloned().collect();
    sorted.sort_by(|a, b| a.timestamp().cmp(&b.timestamp()).then_with(|| a.id().cmp(b.id())));
    sorted
}
