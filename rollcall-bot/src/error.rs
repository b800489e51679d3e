//! Errors raised while loading the roster or driving the roll call.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("roster is empty")]
    EmptyRoster,

    #[error("participant {name:?} has an invalid number {raw:?}")]
    InvalidNumber { name: String, raw: String },

    #[error("invalid report recipient {0:?}")]
    InvalidRecipient(String),

    #[error("participants {first:?} and {second:?} share the address {user:?}")]
    DuplicateAddress {
        user: String,
        first: String,
        second: String,
    },

    #[error("can't read roster {}: {source}", path.display())]
    RosterRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bad roster file {}: {source}", path.display())]
    RosterParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("roll call already started")]
    AlreadyStarted,

    #[error("roll call is not open")]
    NotOpen,

    #[error("failed to send prompt to {name}: {reason}")]
    Prompt { name: String, reason: String },

    #[error("failed to deliver report to {recipient}: {reason}")]
    Report { recipient: String, reason: String },
}
