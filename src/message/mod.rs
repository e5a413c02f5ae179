//! Forum messages and their admission gate.

pub mod types;
pub mod validator;

pub use types::{
    CellPayload, CommentPayload, DisplayPreference, MessageKind, MessagePayload,
    ModeratePayload, ModerationTarget, OpchanMessage, PostPayload, UnsignedMessage,
    UserProfilePayload, VotePayload, VoteValue, SIGNATURE_FIELDS,
};
pub use validator::{MessageValidator, StructureReport, ValidatorLimits};
