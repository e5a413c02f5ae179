//! Forum message types.
//!
//! Every message is a flat JSON object on the wire:
//!
//! ```text
//! { id, type, timestamp, author, <payload keys>, signature, browserPubKey, delegationProof }
//! ```
//!
//! In Rust this is a closed sum type: [`MessagePayload`] is tagged by the
//! `type` key and flattened into [`UnsignedMessage`], which is in turn
//! flattened into the signed [`OpchanMessage`]. Every routing decision
//! (logical key, store table) is an exhaustive match over the payload.

use crate::delegation::DelegationProof;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire names of the signature fields stripped before signing.
pub const SIGNATURE_FIELDS: [&str; 3] = ["signature", "browserPubKey", "delegationProof"];

/// Message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A forum cell (sub-forum).
    Cell,
    /// A post within a cell.
    Post,
    /// A comment on a post.
    Comment,
    /// An up/down vote on a post or comment.
    Vote,
    /// A moderation action by a cell owner.
    Moderate,
    /// A partial update of the author's profile.
    UserProfileUpdate,
}

impl MessageKind {
    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Cell => "CELL",
            MessageKind::Post => "POST",
            MessageKind::Comment => "COMMENT",
            MessageKind::Vote => "VOTE",
            MessageKind::Moderate => "MODERATE",
            MessageKind::UserProfileUpdate => "USER_PROFILE_UPDATE",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum VoteValue {
    /// `+1`
    Up,
    /// `-1`
    Down,
}

impl TryFrom<i8> for VoteValue {
    type Error = String;

    fn try_from(value: i8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(VoteValue::Up),
            -1 => Ok(VoteValue::Down),
            other => Err(format!("vote value must be 1 or -1, got {}", other)),
        }
    }
}

impl From<VoteValue> for i8 {
    fn from(value: VoteValue) -> Self {
        match value {
            VoteValue::Up => 1,
            VoteValue::Down => -1,
        }
    }
}

/// What a moderation action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationTarget {
    /// A post.
    Post,
    /// A comment.
    Comment,
    /// A user (by address) within the cell.
    User,
}

/// How a user wants to be displayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayPreference {
    /// Show the user's call sign.
    CallSign,
    /// Show the wallet address.
    #[default]
    WalletAddress,
}

/// Payload of a `CELL` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellPayload {
    /// Cell name.
    pub name: String,
    /// Cell description.
    pub description: String,
    /// Optional icon URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Payload of a `POST` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPayload {
    /// Cell this post belongs to.
    pub cell_id: String,
    /// Post title.
    pub title: String,
    /// Post body.
    pub content: String,
}

/// Payload of a `COMMENT` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPayload {
    /// Post being commented on.
    pub post_id: String,
    /// Comment body.
    pub content: String,
}

/// Payload of a `VOTE` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotePayload {
    /// Post or comment voted on.
    pub target_id: String,
    /// Vote direction.
    pub value: VoteValue,
}

/// Payload of a `MODERATE` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeratePayload {
    /// Cell in which the action applies.
    pub cell_id: String,
    /// Kind of target.
    pub target_type: ModerationTarget,
    /// Target id (message id or user address).
    pub target_id: String,
    /// Optional free-text reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of a `USER_PROFILE_UPDATE` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfilePayload {
    /// Optional call sign.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_sign: Option<String>,
    /// Display preference.
    pub display_preference: DisplayPreference,
}

/// Type-specific message content, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessagePayload {
    /// `CELL`
    Cell(CellPayload),
    /// `POST`
    Post(PostPayload),
    /// `COMMENT`
    Comment(CommentPayload),
    /// `VOTE`
    Vote(VotePayload),
    /// `MODERATE`
    Moderate(ModeratePayload),
    /// `USER_PROFILE_UPDATE`
    UserProfileUpdate(UserProfilePayload),
}

impl MessagePayload {
    /// Returns the discriminator of this payload.
    pub fn kind(&self) -> MessageKind {
        match self {
            MessagePayload::Cell(_) => MessageKind::Cell,
            MessagePayload::Post(_) => MessageKind::Post,
            MessagePayload::Comment(_) => MessageKind::Comment,
            MessagePayload::Vote(_) => MessageKind::Vote,
            MessagePayload::Moderate(_) => MessageKind::Moderate,
            MessagePayload::UserProfileUpdate(_) => MessageKind::UserProfileUpdate,
        }
    }
}

/// A message before it has been signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedMessage {
    /// Message id, chosen by the author.
    pub id: String,
    /// Author-assigned timestamp in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Wallet address of the author.
    pub author: String,
    /// Type-specific content.
    #[serde(flatten)]
    pub payload: MessagePayload,
}

impl UnsignedMessage {
    /// Creates a new unsigned message.
    pub fn new(
        id: impl Into<String>,
        author: impl Into<String>,
        timestamp: u64,
        payload: MessagePayload,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            author: author.into(),
            payload,
        }
    }

    /// Returns the discriminator of this message.
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Returns the canonical bytes covered by the session signature.
    ///
    /// The message is rendered as a JSON object with its keys in sorted order,
    /// so signer and verifier agree regardless of field declaration order.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_vec(&value)?)
    }
}

/// A fully signed, delegated forum message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpchanMessage {
    /// The signed content.
    #[serde(flatten)]
    pub unsigned: UnsignedMessage,
    /// Hex-encoded Ed25519 signature by the session key.
    pub signature: String,
    /// Hex-encoded session public key.
    pub browser_pub_key: String,
    /// Wallet authorization of the session key.
    pub delegation_proof: DelegationProof,
}

impl OpchanMessage {
    /// Returns the message id.
    pub fn id(&self) -> &str {
        &self.unsigned.id
    }

    /// Returns the author-assigned timestamp.
    pub fn timestamp(&self) -> u64 {
        self.unsigned.timestamp
    }

    /// Returns the author address.
    pub fn author(&self) -> &str {
        &self.unsigned.author
    }

    /// Returns the payload.
    pub fn payload(&self) -> &MessagePayload {
        &self.unsigned.payload
    }

    /// Returns the discriminator of this message.
    pub fn kind(&self) -> MessageKind {
        self.unsigned.kind()
    }

    /// Returns the `type:id:timestamp` key used to detect exact replays.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.kind(), self.id(), self.timestamp())
    }

    /// Returns the key under which the store keeps this message.
    ///
    /// Votes are one per `(target, author)`, moderation one per target, and
    /// profile updates one per author; everything else is keyed by id.
    pub fn logical_key(&self) -> String {
        match self.payload() {
            MessagePayload::Cell(_) | MessagePayload::Post(_) | MessagePayload::Comment(_) => {
                self.id().to_string()
            }
            MessagePayload::Vote(vote) => format!("{}:{}", vote.target_id, self.author()),
            MessagePayload::Moderate(moderate) => moderate.target_id.clone(),
            MessagePayload::UserProfileUpdate(_) => self.author().to_string(),
        }
    }

    /// Parses a message from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Renders the message as a JSON value.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
