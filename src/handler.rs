//! Connection handler
//!
//! Drives one accepted connection: login handshake, Room registration,
//! then the read/write pumps until the participant leaves.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::message::ServerMessage;
use crate::participant::Participant;
use crate::room::{JoinOutcome, RoomHandle};

/// Handle a new connection
///
/// Returns once the participant has left. A connection that drops during
/// login yields `AppError::LoginAborted` and never reaches the Room.
pub async fn handle_connection<S>(
    stream: S,
    room: RoomHandle,
    config: &ServerConfig,
) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let participant = Participant::new(stream, config.outbox_capacity, config.max_line_bytes);
    let id = participant.id();
    debug!(participant = %id, "Starting login handshake");

    let (handle, session) = participant.login(&config.server_name).await?;
    let username = handle.username().to_string();

    match room.join(handle).await? {
        JoinOutcome::Joined => {
            session.run(room).await;
            info!(participant = %id, %username, "Session ended");
        }
        JoinOutcome::Rejected => {
            session
                .refuse(&ServerMessage::UsernameTaken { username })
                .await?;
        }
    }

    Ok(())
}
