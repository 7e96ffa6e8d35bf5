//! Wire text definitions
//!
//! Every line the server writes to a client is one `ServerMessage` variant,
//! rendered through `Display`. Line terminators are added by the codec.

use std::fmt;

use crate::types::Line;

/// Server → Client text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Greeting sent as soon as a connection is accepted
    Banner { server_name: String },
    /// Username prompt (written without a line terminator)
    Prompt,
    /// Personalized greeting after login
    Welcome { username: String },
    /// System notice: a member joined
    Joined { username: String },
    /// System notice: a member left
    Disconnected { username: String },
    /// System notice: the requested username is held by someone else
    UsernameTaken { username: String },
    /// Relayed chat line
    Chat { from: String, text: String },
}

impl ServerMessage {
    /// Render into a shareable outbound line
    pub fn to_line(&self) -> Line {
        Line::from(self.to_string())
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Banner { server_name } => write!(f, "Welcome to {server_name}'s chat server!"),
            Self::Prompt => f.write_str("Please enter your username: "),
            Self::Welcome { username } => write!(f, "Welcome, {username}"),
            Self::Joined { username } => write!(f, "*** {username} just joined the chatroom"),
            Self::Disconnected { username } => write!(f, "*** {username} has disconnected"),
            Self::UsernameTaken { username } => write!(f, "*** {username} is already taken"),
            Self::Chat { from, text } => write!(f, "[{from}] {text}"),
        }
    }
}
