//! Bookmarks, the authenticated user record, and UI state.
//!
//! Unlike forum messages these are local user actions, so persistence
//! errors are returned to the caller instead of being swallowed.

use super::{Bookmark, BookmarkType, LocalStore, UserAuth};
use crate::error::Result;
use crate::storage::{composite_key, Table, CURRENT_KEY};
use serde_json::Value;
use tracing::debug;

impl LocalStore {
    // =========================================================================
    // Bookmarks
    // =========================================================================

    /// Adds or replaces a bookmark.
    pub fn add_bookmark(&self, bookmark: Bookmark) -> Result<()> {
        let mut cache = self.lock();
        if let Some(previous) = cache.bookmarks.get(&bookmark.id) {
            if previous.user_id != bookmark.user_id {
                self.db.delete(
                    Table::BookmarksByUser.name(),
                    &composite_key(&previous.user_id, &previous.id),
                )?;
            }
        }

        self.db
            .put(Table::Bookmarks.name(), bookmark.id.as_bytes(), &bookmark)?;
        self.db.put_raw(
            Table::BookmarksByUser.name(),
            &composite_key(&bookmark.user_id, &bookmark.id),
            &[],
        )?;
        debug!(id = %bookmark.id, user = %bookmark.user_id, "Added bookmark");
        cache.bookmarks.insert(bookmark.id.clone(), bookmark);
        Ok(())
    }

    /// Removes a bookmark. Returns false if it did not exist.
    pub fn remove_bookmark(&self, bookmark_id: &str) -> Result<bool> {
        let mut cache = self.lock();
        let Some(bookmark) = cache.bookmarks.remove(bookmark_id) else {
            return Ok(false);
        };
        self.db
            .delete(Table::Bookmarks.name(), bookmark_id.as_bytes())?;
        self.db.delete(
            Table::BookmarksByUser.name(),
            &composite_key(&bookmark.user_id, bookmark_id),
        )?;
        debug!(id = bookmark_id, "Removed bookmark");
        Ok(true)
    }

    /// Returns true if the user has bookmarked the target.
    pub fn is_bookmarked(&self, user_id: &str, bookmark_type: BookmarkType, target_id: &str) -> bool {
        self.lock()
            .bookmarks
            .get(&Bookmark::id_for(bookmark_type, target_id))
            .is_some_and(|bookmark| bookmark.user_id == user_id)
    }

    /// Returns a user's bookmarks, newest first.
    pub fn bookmarks_for_user(&self, user_id: &str) -> Result<Vec<Bookmark>> {
        let prefix = composite_key(user_id, "");
        let mut ids = Vec::new();
        self.db
            .prefix_iterate(Table::BookmarksByUser.name(), &prefix, |key, _| {
                ids.push(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
                true
            })?;

        let cache = self.lock();
        let mut bookmarks: Vec<Bookmark> = ids
            .iter()
            .filter_map(|id| cache.bookmarks.get(id).cloned())
            .collect();
        bookmarks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookmarks)
    }

    // =========================================================================
    // User auth
    // =========================================================================

    /// Persists the authenticated user.
    pub fn store_user_auth(&self, auth: &UserAuth) -> Result<()> {
        self.db.put(Table::UserAuth.name(), CURRENT_KEY, auth)
    }

    /// Loads the authenticated user, if any.
    pub fn load_user_auth(&self) -> Result<Option<UserAuth>> {
        self.db.get(Table::UserAuth.name(), CURRENT_KEY)
    }

    /// Forgets the authenticated user.
    pub fn clear_user_auth(&self) -> Result<()> {
        self.db.delete(Table::UserAuth.name(), CURRENT_KEY)
    }

    // =========================================================================
    // UI state
    // =========================================================================

    /// Stores an arbitrary JSON value for the UI.
    pub fn set_ui_state(&self, key: &str, value: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_raw(Table::UiState.name(), key.as_bytes(), &bytes)
    }

    /// Reads a UI state value.
    pub fn get_ui_state(&self, key: &str) -> Result<Option<Value>> {
        match self.db.get_raw(Table::UiState.name(), key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Deletes a UI state value.
    pub fn remove_ui_state(&self, key: &str) -> Result<()> {
        self.db.delete(Table::UiState.name(), key.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::{WalletType, WalletVerifier};
    use crate::delegation::DelegationManager;
    use crate::message::MessageValidator;
    use crate::storage::{open_database, RocksDbConfig};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct NoWallet;

    impl WalletVerifier for NoWallet {
        fn verify(&self, _: WalletType, _: &str, _: &str, _: &str) -> bool {
            false
        }
    }

    fn open(temp: &TempDir) -> LocalStore {
        let db = Arc::new(open_database(temp.path(), &RocksDbConfig::default()).unwrap());
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = Arc::new(DelegationManager::new(
            db.clone(),
            Arc::new(NoWallet),
            clock.clone(),
        ));
        LocalStore::open(db, MessageValidator::new(manager, clock.clone()), clock).unwrap()
    }

    #[test]
    fn test_bookmarks_by_user() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        store
            .add_bookmark(Bookmark::new(BookmarkType::Post, "p1", "0xA", 1))
            .unwrap();
        store
            .add_bookmark(Bookmark::new(BookmarkType::Comment, "c1", "0xA", 2))
            .unwrap();
        store
            .add_bookmark(Bookmark::new(BookmarkType::Post, "p2", "0xAB", 3))
            .unwrap();

        let mine = store.bookmarks_for_user("0xA").unwrap();
        assert_eq!(
            mine.iter().map(|b| b.id.as_str()).collect::<Vec<_>>(),
            vec!["comment:c1", "post:p1"]
        );
        assert!(store.is_bookmarked("0xA", BookmarkType::Post, "p1"));
        assert!(!store.is_bookmarked("0xAB", BookmarkType::Post, "p1"));

        assert!(store.remove_bookmark("post:p1").unwrap());
        assert!(!store.remove_bookmark("post:p1").unwrap());
        assert_eq!(store.bookmarks_for_user("0xA").unwrap().len(), 1);
    }

    #[test]
    fn test_bookmarks_survive_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store = open(&temp);
            store
                .add_bookmark(Bookmark::new(BookmarkType::Post, "p1", "0xA", 1).with_title("t"))
                .unwrap();
        }
        let store = open(&temp);
        let mine = store.bookmarks_for_user("0xA").unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].title.as_deref(), Some("t"));
    }

    #[test]
    fn test_user_auth_and_ui_state() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        assert!(store.load_user_auth().unwrap().is_none());
        let auth = UserAuth {
            address: "0xA".to_string(),
            wallet_type: WalletType::Ethereum,
            call_sign: None,
            ens_name: Some("alice.eth".to_string()),
            last_checked: 5,
        };
        store.store_user_auth(&auth).unwrap();
        assert_eq!(store.load_user_auth().unwrap(), Some(auth));
        store.clear_user_auth().unwrap();
        assert!(store.load_user_auth().unwrap().is_none());

        store
            .set_ui_state("sidebar", &json!({"collapsed": true}))
            .unwrap();
        assert_eq!(
            store.get_ui_state("sidebar").unwrap(),
            Some(json!({"collapsed": true}))
        );
        store.remove_ui_state("sidebar").unwrap();
        assert!(store.get_ui_state("sidebar").unwrap().is_none());
    }
}
