//! Participant: one connection's login handshake and message pumps
//!
//! A connection moves through three values:
//! - `Participant` owns the raw stream before login
//! - `Session` owns the framed halves and outbox receiver after login
//! - `ParticipantHandle` is the Room's side: outbox sender plus close signal
//!
//! The lifecycle phase is shared through a `watch` channel so either pump or
//! the Room can close the connection and every side observes it.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::codec::{LineReader, LineWriter};
use crate::error::{AppError, SendError};
use crate::message::ServerMessage;
use crate::room::RoomHandle;
use crate::types::{Line, ParticipantId};

/// Connection lifecycle, forward-only
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionPhase {
    /// Accepted, not yet admitted to the Room
    Connected,
    /// Registered, both pumps running
    Active,
    /// Disconnected flag set, pumps winding down
    Closing,
    /// Pumps finished, connection released
    Closed,
}

/// Shared lifecycle state of one connection
#[derive(Debug, Clone)]
pub struct ConnectionState {
    phase: Arc<watch::Sender<ConnectionPhase>>,
}

impl ConnectionState {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(ConnectionPhase::Connected);
        Self {
            phase: Arc::new(phase),
        }
    }

    /// Current phase
    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.borrow()
    }

    /// True once the disconnected flag has been set
    pub fn is_closed(&self) -> bool {
        self.phase() >= ConnectionPhase::Closing
    }

    /// Move to `next` if it is later than the current phase
    ///
    /// Returns whether the phase changed.
    pub fn advance(&self, next: ConnectionPhase) -> bool {
        self.phase.send_if_modified(|phase| {
            if next > *phase {
                *phase = next;
                true
            } else {
                false
            }
        })
    }

    /// Set the disconnected flag; both pumps stop and release the connection
    ///
    /// Idempotent. Returns true only for the call that set the flag.
    pub fn close(&self) -> bool {
        self.advance(ConnectionPhase::Closing)
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase.subscribe()
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the connection is closing (or its state is gone)
async fn closing(phase: &mut watch::Receiver<ConnectionPhase>) {
    let _ = phase
        .wait_for(|phase| *phase >= ConnectionPhase::Closing)
        .await;
}

/// The Room's handle on one logged-in participant
#[derive(Debug)]
pub struct ParticipantHandle {
    id: ParticipantId,
    username: String,
    outbox: mpsc::Sender<Line>,
    state: ConnectionState,
}

impl ParticipantHandle {
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Queue a line for this participant's write pump
    ///
    /// Never waits: a full outbox drops the line and reports `Full`.
    pub fn send(&self, line: Line) -> Result<(), SendError> {
        if self.state.is_closed() {
            return Err(SendError::Closed);
        }

        self.outbox.try_send(line).map_err(|err| match err {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Close the connection; idempotent
    pub fn close(&self) {
        if self.state.close() {
            debug!(participant = %self.id, username = %self.username, "Closing connection");
        }
    }
}

/// A freshly accepted connection
pub struct Participant<S> {
    id: ParticipantId,
    reader: LineReader<ReadHalf<S>>,
    writer: LineWriter<WriteHalf<S>>,
    state: ConnectionState,
    outbox_capacity: usize,
}

impl<S> Participant<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S, outbox_capacity: usize, max_line_bytes: usize) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            id: ParticipantId::new(),
            reader: LineReader::new(reader, max_line_bytes),
            writer: LineWriter::new(writer),
            state: ConnectionState::new(),
            outbox_capacity,
        }
    }

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Run the login handshake on this connection
    ///
    /// Writes the banner and prompt, reads the username (re-prompting on a
    /// blank line) and writes the personalized welcome. Registration with the
    /// Room is left to the caller: pass the returned handle to
    /// `RoomHandle::join`, then start the returned session.
    pub async fn login(
        mut self,
        server_name: &str,
    ) -> Result<(ParticipantHandle, Session<S>), AppError> {
        let banner = ServerMessage::Banner {
            server_name: server_name.to_string(),
        };
        self.writer.write_line(&banner.to_string()).await?;

        let username = loop {
            self.writer
                .write_prompt(&ServerMessage::Prompt.to_string())
                .await?;

            match self.reader.read_line().await? {
                Some(name) if !name.trim().is_empty() => break name,
                Some(_) => debug!(participant = %self.id, "Blank username, prompting again"),
                None => return Err(AppError::LoginAborted),
            }
        };

        info!(participant = %self.id, %username, "User logged in");

        let welcome = ServerMessage::Welcome {
            username: username.clone(),
        };
        self.writer.write_line(&welcome.to_string()).await?;

        let (outbox, inbox) = mpsc::channel(self.outbox_capacity);
        let handle = ParticipantHandle {
            id: self.id,
            username: username.clone(),
            outbox,
            state: self.state.clone(),
        };
        let session = Session {
            id: self.id,
            username,
            reader: self.reader,
            writer: self.writer,
            outbox: inbox,
            state: self.state,
        };

        Ok((handle, session))
    }
}

/// A logged-in connection, ready to run its pumps
pub struct Session<S> {
    id: ParticipantId,
    username: String,
    reader: LineReader<ReadHalf<S>>,
    writer: LineWriter<WriteHalf<S>>,
    outbox: mpsc::Receiver<Line>,
    state: ConnectionState,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Run the read and write pumps until both have stopped
    ///
    /// Call only after the Room admitted this participant.
    pub async fn run(self, room: RoomHandle) {
        let Session {
            id,
            username,
            reader,
            writer,
            outbox,
            state,
        } = self;

        if !state.advance(ConnectionPhase::Active) {
            debug!(participant = %id, %username, "Closed before pumps started");
        }

        let pump = Pump {
            id,
            username,
            room,
            state: state.clone(),
        };

        let read_task = tokio::spawn(read_loop(reader, pump.clone()));
        let write_task = tokio::spawn(write_loop(writer, outbox, pump));

        let (read_result, write_result) = tokio::join!(read_task, write_task);
        if let Err(e) = read_result {
            error!(participant = %id, "Read pump panicked: {}", e);
        }
        if let Err(e) = write_result {
            error!(participant = %id, "Write pump panicked: {}", e);
        }

        state.close();
        state.advance(ConnectionPhase::Closed);
    }

    /// Tell the client why it was not admitted, then close the connection
    pub async fn refuse(mut self, message: &ServerMessage) -> Result<(), AppError> {
        self.state.close();
        let result = self.writer.write_line(&message.to_string()).await;
        let _ = self.writer.shutdown().await;
        self.state.advance(ConnectionPhase::Closed);
        result.map_err(AppError::from)
    }
}

/// What each pump needs to report back to the Room
#[derive(Clone)]
struct Pump {
    id: ParticipantId,
    username: String,
    room: RoomHandle,
    state: ConnectionState,
}

impl Pump {
    /// Ask the Room to remove this participant, then stop both pumps
    async fn logout(&self) {
        if self.room.logout(&self.username, self.id).await.is_err() {
            debug!(participant = %self.id, "Room closed before logout");
        }
        self.state.close();
    }
}

/// Inbound pump: connection lines → `Incoming` events
async fn read_loop<R>(mut reader: LineReader<R>, pump: Pump)
where
    R: AsyncRead + Unpin,
{
    let mut phase = pump.state.subscribe();

    loop {
        let result = tokio::select! {
            biased;
            _ = closing(&mut phase) => {
                debug!(participant = %pump.id, "Read pump stopped by close");
                return;
            }
            result = reader.read_line() => result,
        };

        match result {
            Ok(Some(text)) => {
                if pump.state.is_closed() {
                    return;
                }
                let line = ServerMessage::Chat {
                    from: pump.username.clone(),
                    text,
                };
                if pump.room.incoming(line.to_string()).await.is_err() {
                    debug!(participant = %pump.id, "Room closed, ending read pump");
                    pump.state.close();
                    return;
                }
            }
            Ok(None) => {
                info!(participant = %pump.id, username = %pump.username, "Client closed connection");
                break;
            }
            Err(e) => {
                warn!(participant = %pump.id, username = %pump.username, "Error reading from socket: {}", e);
                break;
            }
        }
    }

    pump.logout().await;
}

/// Outbound pump: outbox lines → connection
async fn write_loop<W>(mut writer: LineWriter<W>, mut outbox: mpsc::Receiver<Line>, pump: Pump)
where
    W: AsyncWrite + Unpin,
{
    let mut phase = pump.state.subscribe();

    loop {
        let next = tokio::select! {
            biased;
            _ = closing(&mut phase) => break,
            next = outbox.recv() => next,
        };

        let Some(line) = next else {
            debug!(participant = %pump.id, "Outbox dropped, ending write pump");
            pump.state.close();
            break;
        };

        let result = tokio::select! {
            biased;
            _ = closing(&mut phase) => break,
            result = writer.write_line(&line) => result,
        };

        if let Err(e) = result {
            warn!(participant = %pump.id, username = %pump.username, "Error writing to socket: {}", e);
            pump.logout().await;
            break;
        }
    }

    debug!(participant = %pump.id, "Write pump ended");
}

#[cfg(test)]
impl ParticipantHandle {
    /// A handle with no connection behind it, for driving the Room directly
    pub(crate) fn detached(username: &str, capacity: usize) -> (Self, mpsc::Receiver<Line>) {
        let (outbox, inbox) = mpsc::channel(capacity);
        let handle = Self {
            id: ParticipantId::new(),
            username: username.to_string(),
            outbox,
            state: ConnectionState::new(),
        };
        (handle, inbox)
    }
}
