//! Error taxonomy for session operations.
//!
//! Validation failures are the only class reported back to the initiating
//! client; drift and broadcast-delivery failures are handled internally and
//! never escalate out of the operation that observed them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Message content exceeds the configured maximum length.
    #[error("message exceeds the {0} character limit")]
    MessageTooLong(usize),

    /// The room no longer accepts messages or joins.
    #[error("room '{0}' is closed")]
    RoomClosed(String),

    #[error("room '{0}' does not exist")]
    UnknownRoom(String),

    #[error("user '{0}' does not exist")]
    UnknownUser(String),

    /// Private room and the user is not on its allowed list.
    #[error("you do not have access to room '{0}'")]
    AccessDenied(String),

    #[error("you are not a member of room '{0}'")]
    NotInRoom(String),

    #[error("you are not an owner of room '{0}'")]
    NotOwner(String),

    #[error("storage error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl ChatError {
    /// Whether this error should be surfaced to the initiating client.
    /// Storage errors are logged server-side and reported generically.
    pub fn is_validation(&self) -> bool {
        !matches!(self, ChatError::Store(_))
    }
}
