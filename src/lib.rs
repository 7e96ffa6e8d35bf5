//! Multi-user line chat server library
//!
//! Clients connect over TCP, pick a username, and every line they send is
//! relayed to everyone in the room as `[username] text`.
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Room` is the central actor and the only owner of the member registry
//! - Each connection runs a login handshake, then a read pump and a write pump
//! - Pumps reach the Room only through `RoomHandle` events; no locks on shared state
//! - Each participant has a bounded outbox so a slow client never stalls the Room
//!
//! # Example
//! ```ignore
//! use line_chat_server::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = ChatServer::bind(ServerConfig::from_env()?).await?;
//!     server.run_until_ctrl_c().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod participant;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use config::{DuplicatePolicy, ServerConfig};
pub use error::{AppError, ConfigError, SendError};
pub use handler::handle_connection;
pub use message::ServerMessage;
pub use participant::{ConnectionPhase, ConnectionState, Participant, ParticipantHandle, Session};
pub use room::{JoinOutcome, Room, RoomEvent, RoomHandle};
pub use server::ChatServer;
pub use types::{Line, ParticipantId};
