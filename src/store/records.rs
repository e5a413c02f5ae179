//! Records the store keeps besides raw forum messages.

use crate::crypto::WalletType;
use crate::message::DisplayPreference;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Derived view of a user, built from profile updates and external lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    /// Wallet address.
    pub address: String,
    /// Call sign from the latest profile update.
    pub call_sign: Option<String>,
    /// Display preference from the latest profile update.
    pub display_preference: DisplayPreference,
    /// Resolved ENS name.
    pub ens_name: Option<String>,
    /// Resolved Ordinal inscription details.
    pub ordinal_details: Option<String>,
    /// Timestamp of the profile update this record reflects (0 if none yet).
    pub last_updated: u64,
}

impl UserIdentity {
    /// An identity with nothing known beyond the address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            call_sign: None,
            display_preference: DisplayPreference::default(),
            ens_name: None,
            ordinal_details: None,
            last_updated: 0,
        }
    }

    /// Name to show for this user, honoring the display preference.
    pub fn display_name(&self) -> &str {
        match (self.display_preference, &self.call_sign, &self.ens_name) {
            (DisplayPreference::CallSign, Some(call_sign), _) => call_sign,
            (_, _, Some(ens_name)) => ens_name,
            _ => &self.address,
        }
    }
}

/// What a bookmark points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookmarkType {
    /// A post.
    Post,
    /// A comment.
    Comment,
}

impl fmt::Display for BookmarkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookmarkType::Post => f.write_str("post"),
            BookmarkType::Comment => f.write_str("comment"),
        }
    }
}

/// A user's bookmark of a post or comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    /// `{type}:{targetId}`.
    pub id: String,
    /// Kind of target.
    pub bookmark_type: BookmarkType,
    /// Bookmarked message id.
    pub target_id: String,
    /// Address of the user who bookmarked it.
    pub user_id: String,
    /// Creation time in milliseconds.
    pub created_at: u64,
    /// Title shown in bookmark lists.
    pub title: Option<String>,
    /// Cell containing the target.
    pub cell_id: Option<String>,
}

impl Bookmark {
    /// Creates a bookmark with the derived id.
    pub fn new(
        bookmark_type: BookmarkType,
        target_id: impl Into<String>,
        user_id: impl Into<String>,
        created_at: u64,
    ) -> Self {
        let target_id = target_id.into();
        Self {
            id: Self::id_for(bookmark_type, &target_id),
            bookmark_type,
            target_id,
            user_id: user_id.into(),
            created_at,
            title: None,
            cell_id: None,
        }
    }

    /// Returns the id a bookmark of this target has.
    pub fn id_for(bookmark_type: BookmarkType, target_id: &str) -> String {
        format!("{}:{}", bookmark_type, target_id)
    }

    /// Sets the display title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the containing cell.
    pub fn with_cell_id(mut self, cell_id: impl Into<String>) -> Self {
        self.cell_id = Some(cell_id.into());
        self
    }
}

/// The locally authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAuth {
    /// Connected wallet address.
    pub address: String,
    /// Connected wallet family.
    pub wallet_type: WalletType,
    /// Call sign, if the user has set one.
    pub call_sign: Option<String>,
    /// Resolved ENS name.
    pub ens_name: Option<String>,
    /// When the wallet connection was last checked, in milliseconds.
    pub last_checked: u64,
}

/// Entry counts of the in-memory cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Cells.
    pub cells: usize,
    /// Posts.
    pub posts: usize,
    /// Comments.
    pub comments: usize,
    /// Votes.
    pub votes: usize,
    /// Moderation actions.
    pub moderations: usize,
    /// User identities.
    pub identities: usize,
    /// Bookmarks.
    pub bookmarks: usize,
    /// Unacknowledged local messages.
    pub pending: usize,
    /// Distinct messages seen.
    pub processed: usize,
}

/// A pending-set mutation, delivered to [`on_pending_change`](super::LocalStore::on_pending_change) listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    /// Message id.
    pub id: String,
    /// True if the id was just marked pending, false if just cleared.
    pub pending: bool,
}
