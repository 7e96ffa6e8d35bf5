//! TCP listener and accept loop
//!
//! Binds the configured address, starts the Room, and spawns one handler
//! task per accepted connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::handler::handle_connection;
use crate::room::{Room, RoomHandle};

/// A bound chat server with its Room already running
pub struct ChatServer {
    listener: TcpListener,
    room: RoomHandle,
    config: Arc<ServerConfig>,
}

impl ChatServer {
    /// Bind the listener and start the Room
    ///
    /// A bind failure is returned to the caller and is fatal for startup.
    pub async fn bind(config: ServerConfig) -> Result<Self, AppError> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let room = Room::spawn(&config);

        Ok(Self {
            listener,
            room,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle on this server's Room
    pub fn room(&self) -> RoomHandle {
        self.room.clone()
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// An accept failure stops the loop and is returned. Either way the Room
    /// is shut down, closing every participant.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send,
    {
        let ChatServer {
            listener,
            room,
            config,
        } = self;
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => spawn_connection(stream, peer, &room, &config),
                    Err(e) => {
                        error!("Error when accepting connection: {}", e);
                        break Err(AppError::Io(e));
                    }
                },
            }
        };

        if room.shutdown().await.is_err() {
            debug!("Room already stopped");
        }

        result
    }

    /// Accept connections until Ctrl-C
    pub async fn run_until_ctrl_c(self) -> Result<(), AppError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install Ctrl-C handler: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

fn spawn_connection(
    stream: TcpStream,
    peer: SocketAddr,
    room: &RoomHandle,
    config: &Arc<ServerConfig>,
) {
    info!(%peer, "New connection");
    let room = room.clone();
    let config = Arc::clone(config);

    tokio::spawn(async move {
        match handle_connection(stream, room, &config).await {
            Ok(()) => debug!(%peer, "Connection closed"),
            Err(AppError::LoginAborted) => info!(%peer, "Connection closed before login"),
            Err(e) => warn!(%peer, "Connection handler error: {}", e),
        }
    });
}
