//! Persistent key-value backing store.
//!
//! ## Storage Layout
//!
//! One RocksDB column family per table:
//! - `cells`, `posts`, `comments`: `{message_id}` -> message JSON
//! - `votes`: `{targetId}:{author}` -> message JSON
//! - `moderations`: `{targetId}` -> message JSON
//! - `userIdentities`: `{address}` -> [`UserIdentity`](crate::store::UserIdentity)
//! - `userAuth`, `delegation`: `current` -> single record
//! - `uiState`: arbitrary key -> JSON value
//! - `meta`: `lastSync` and `pending:{id}` markers
//! - `bookmarks`: `{type}:{targetId}` -> [`Bookmark`](crate::store::Bookmark)
//! - `idx_bookmarks_user`: `{userId}:{bookmarkId}` -> () (range index)

pub mod rocksdb;

pub use self::rocksdb::{composite_key, RocksDbConfig, RocksDbHandle};

use crate::error::Result;
use std::path::Path;
use tracing::info;

/// Database subdirectory inside the client data directory.
const DB_DIR: &str = "opchan_db";

/// Fixed key for single-record tables.
pub const CURRENT_KEY: &[u8] = b"current";

/// Logical tables of the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Cells,
    Posts,
    Comments,
    Votes,
    Moderations,
    UserIdentities,
    UserAuth,
    Delegation,
    UiState,
    Meta,
    Bookmarks,
    BookmarksByUser,
}

impl Table {
    /// Every table, in creation order.
    pub const ALL: [Table; 12] = [
        Table::Cells,
        Table::Posts,
        Table::Comments,
        Table::Votes,
        Table::Moderations,
        Table::UserIdentities,
        Table::UserAuth,
        Table::Delegation,
        Table::UiState,
        Table::Meta,
        Table::Bookmarks,
        Table::BookmarksByUser,
    ];

    /// Returns the column family name.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Cells => "cells",
            Table::Posts => "posts",
            Table::Comments => "comments",
            Table::Votes => "votes",
            Table::Moderations => "moderations",
            Table::UserIdentities => "userIdentities",
            Table::UserAuth => "userAuth",
            Table::Delegation => "delegation",
            Table::UiState => "uiState",
            Table::Meta => "meta",
            Table::Bookmarks => "bookmarks",
            Table::BookmarksByUser => "idx_bookmarks_user",
        }
    }
}

/// Opens the client database under `data_dir` with every table present.
pub fn open_database(data_dir: impl AsRef<Path>, config: &RocksDbConfig) -> Result<RocksDbHandle> {
    let db_path = data_dir.as_ref().join(DB_DIR);
    let names: Vec<&str> = Table::ALL.iter().map(Table::name).collect();
    let db = RocksDbHandle::open(&db_path, config, &names)?;
    info!("Opened opchan RocksDB at {:?}", db_path);
    Ok(db)
}
