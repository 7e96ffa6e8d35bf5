//! Basic type definitions for the chat server
//!
//! Provides:
//! - `ParticipantId`: UUID-based identity of one connection
//! - `Line`: an immutable outbound text line shared across outboxes

use std::sync::Arc;

use uuid::Uuid;

/// Unique participant identifier (newtype pattern)
///
/// Usernames can be taken over by a later connection, so the Room uses this
/// to tell two connections with the same name apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Create a new random participant ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One outbound text line, without its terminator.
///
/// Broadcasts render a line once and hand every member a cheap clone.
pub type Line = Arc<str>;
