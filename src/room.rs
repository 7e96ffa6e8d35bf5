//! Room actor implementation
//!
//! The Room owns the username → participant registry and is the only code
//! that touches it. Connection tasks talk to it through `RoomHandle`, which
//! turns every call into a `RoomEvent` on one mpsc channel, so membership
//! changes and broadcasts are applied strictly in arrival order.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::ControlFlow;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::{DuplicatePolicy, ServerConfig};
use crate::error::{AppError, SendError};
use crate::message::ServerMessage;
use crate::participant::ParticipantHandle;
use crate::types::{Line, ParticipantId};

/// Events sent from connection tasks to the Room
#[derive(Debug)]
pub enum RoomEvent {
    /// A logged-in participant asks to be registered
    Join {
        participant: ParticipantHandle,
        ack: oneshot::Sender<JoinOutcome>,
    },
    /// A chat line, already prefixed with its sender
    Incoming(String),
    /// Remove a member by name
    ///
    /// With `id` set, only the connection with that id is removed; a logout
    /// from a connection that was taken over is ignored.
    Disconnect {
        username: String,
        id: Option<ParticipantId>,
    },
    /// Report the registered usernames
    Members { reply: oneshot::Sender<Vec<String>> },
    /// Close every participant and stop the loop
    Shutdown,
}

/// Result of a `Join`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Registered; the caller should start the participant's pumps
    Joined,
    /// Username already taken under `DuplicatePolicy::Reject`
    Rejected,
}

/// Cloneable sender side of the Room
#[derive(Debug, Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomEvent>,
}

impl RoomHandle {
    /// Register a logged-in participant and wait for the Room's decision
    pub async fn join(&self, participant: ParticipantHandle) -> Result<JoinOutcome, AppError> {
        let (ack, outcome) = oneshot::channel();
        self.send(RoomEvent::Join { participant, ack }).await?;
        outcome.await.map_err(|_| AppError::RoomClosed)
    }

    /// Broadcast a chat line to every member
    pub async fn incoming(&self, text: String) -> Result<(), AppError> {
        self.send(RoomEvent::Incoming(text)).await
    }

    /// Remove whoever is registered under `username`
    pub async fn disconnect(&self, username: impl Into<String>) -> Result<(), AppError> {
        self.send(RoomEvent::Disconnect {
            username: username.into(),
            id: None,
        })
        .await
    }

    /// Request removal of the participant `id`, registered as `username`
    pub async fn logout(&self, username: &str, id: ParticipantId) -> Result<(), AppError> {
        self.send(RoomEvent::Disconnect {
            username: username.to_string(),
            id: Some(id),
        })
        .await
    }

    /// Sorted list of registered usernames
    pub async fn members(&self) -> Result<Vec<String>, AppError> {
        let (reply, members) = oneshot::channel();
        self.send(RoomEvent::Members { reply }).await?;
        members.await.map_err(|_| AppError::RoomClosed)
    }

    /// Close every participant and stop the Room
    pub async fn shutdown(&self) -> Result<(), AppError> {
        self.send(RoomEvent::Shutdown).await
    }

    async fn send(&self, event: RoomEvent) -> Result<(), AppError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| AppError::RoomClosed)
    }
}

/// The Room actor
///
/// Holds the registry and processes events until `Shutdown` or until every
/// `RoomHandle` is dropped.
pub struct Room {
    /// Registered participants: username -> handle
    participants: HashMap<String, ParticipantHandle>,
    /// Username collision handling
    duplicate_policy: DuplicatePolicy,
    /// Event receiver channel
    receiver: mpsc::Receiver<RoomEvent>,
}

impl Room {
    /// Create a Room with the given event receiver
    pub fn new(receiver: mpsc::Receiver<RoomEvent>, duplicate_policy: DuplicatePolicy) -> Self {
        Self {
            participants: HashMap::new(),
            duplicate_policy,
            receiver,
        }
    }

    /// Create a Room together with its handle
    pub fn channel(event_buffer: usize, duplicate_policy: DuplicatePolicy) -> (Self, RoomHandle) {
        let (sender, receiver) = mpsc::channel(event_buffer);
        (Self::new(receiver, duplicate_policy), RoomHandle { sender })
    }

    /// Start a Room task configured from `config`
    pub fn spawn(config: &ServerConfig) -> RoomHandle {
        let (room, handle) = Self::channel(config.event_buffer, config.duplicate_policy);
        tokio::spawn(room.run());
        handle
    }

    /// Run the Room event loop
    pub async fn run(mut self) {
        info!("Room started");

        while let Some(event) = self.receiver.recv().await {
            if self.handle_event(event).is_break() {
                break;
            }
        }

        self.close_all();
        info!("Room shutting down");
    }

    /// Process a single event
    fn handle_event(&mut self, event: RoomEvent) -> ControlFlow<()> {
        match event {
            RoomEvent::Join { participant, ack } => self.handle_join(participant, ack),
            RoomEvent::Incoming(text) => self.broadcast(Line::from(text)),
            RoomEvent::Disconnect { username, id } => self.handle_disconnect(username, id),
            RoomEvent::Members { reply } => {
                let _ = reply.send(self.members());
            }
            RoomEvent::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Handle a logged-in participant asking to join
    fn handle_join(&mut self, participant: ParticipantHandle, ack: oneshot::Sender<JoinOutcome>) {
        let username = participant.username().to_string();
        let id = participant.id();
        let policy = self.duplicate_policy;

        let outcome = match self.participants.entry(username.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(participant);
                JoinOutcome::Joined
            }
            Entry::Occupied(mut slot) => match policy {
                DuplicatePolicy::Takeover => {
                    let displaced = slot.insert(participant);
                    info!(%username, displaced = %displaced.id(), "Username taken over by new connection");
                    displaced.close();
                    debug!(%username, "Displaced connection leaves without a disconnect notice");
                    JoinOutcome::Joined
                }
                DuplicatePolicy::Reject => {
                    info!(%username, "Rejected duplicate username");
                    JoinOutcome::Rejected
                }
            },
        };

        if ack.send(outcome).is_err() {
            // Connection task is gone; nobody will run the pumps.
            if outcome == JoinOutcome::Joined {
                self.remove_if(&username, id);
            }
            return;
        }

        if outcome == JoinOutcome::Joined {
            info!(%username, participant = %id, "Participant joined");
            debug!("Total participants: {}", self.participants.len());
            self.broadcast(ServerMessage::Joined { username }.to_line());
        }
    }

    /// Handle a disconnect request
    fn handle_disconnect(&mut self, username: String, id: Option<ParticipantId>) {
        match self.participants.get(&username) {
            None => {
                debug!(%username, "Disconnect for unregistered username ignored");
                return;
            }
            Some(current) if id.is_some_and(|id| id != current.id()) => {
                debug!(%username, "Stale logout from a replaced connection ignored");
                return;
            }
            Some(_) => {}
        }

        if let Some(participant) = self.participants.remove(&username) {
            participant.close();
            info!(%username, participant = %participant.id(), "Participant disconnected");
            debug!("Total participants: {}", self.participants.len());
            self.broadcast(ServerMessage::Disconnected { username }.to_line());
        }
    }

    /// Deliver one line to every registered participant
    ///
    /// Each delivery is a non-blocking enqueue; a full or closed outbox only
    /// affects its own participant.
    fn broadcast(&self, line: Line) {
        debug!(line = %line, recipients = self.participants.len(), "Broadcasting");

        for participant in self.participants.values() {
            match participant.send(line.clone()) {
                Ok(()) => {}
                Err(SendError::Full) => {
                    warn!(username = participant.username(), "Outbox full, dropping line");
                }
                Err(SendError::Closed) => {
                    debug!(username = participant.username(), "Outbox closed, skipping");
                }
            }
        }
    }

    /// Remove `username` only if it still belongs to `id`
    fn remove_if(&mut self, username: &str, id: ParticipantId) {
        if self
            .participants
            .get(username)
            .is_some_and(|current| current.id() == id)
        {
            if let Some(participant) = self.participants.remove(username) {
                participant.close();
            }
        }
    }

    fn members(&self) -> Vec<String> {
        let mut names: Vec<String> = self.participants.keys().cloned().collect();
        names.sort();
        names
    }

    fn close_all(&mut self) {
        for (_, participant) in self.participants.drain() {
            participant.close();
        }
    }
}
