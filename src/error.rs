//! Error types for the chat server
//!
//! Defines application-level errors, outbox send errors, and configuration errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Everything here is local to one connection except `Config` and a bind
/// failure surfaced through `Io`, which abort startup.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal for the connection, or for startup when binding)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The room event loop is no longer running
    #[error("Room closed")]
    RoomClosed,

    /// Connection closed before a username was supplied
    #[error("Connection closed before login completed")]
    LoginAborted,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Outbox send errors
///
/// Returned when the Room cannot enqueue a line for one participant.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The outbox is at capacity; the line was dropped
    #[error("Outbox full")]
    Full,

    /// The participant's write pump has gone away
    #[error("Outbox closed")]
    Closed,
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable could not be parsed into its expected type
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },

    /// A capacity or size variable was zero
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
}
