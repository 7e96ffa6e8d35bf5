use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use line_chat_server::{
    handle_connection, AppError, ConnectionPhase, DuplicatePolicy, Participant, Room, RoomHandle,
    ServerConfig,
};
use tokio::{
    io::{
        AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
        DuplexStream, ReadBuf, ReadHalf, WriteHalf,
    },
    task::JoinHandle,
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);
const PROMPT: &str = "Please enter your username: ";

struct MemoryClient {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl MemoryClient {
    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let bytes = timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .context("timed out waiting for line")??;
        if bytes == 0 {
            return Err(anyhow!("connection closed"));
        }
        Ok(line.trim_end_matches('\n').to_string())
    }

    async fn expect_handshake(&mut self, username: &str) -> Result<()> {
        assert_eq!(self.read_line().await?, "Welcome to Mukul's chat server!");
        let mut prompt = vec![0u8; PROMPT.len()];
        timeout(READ_TIMEOUT, self.reader.read_exact(&mut prompt))
            .await
            .context("timed out waiting for prompt")??;
        assert_eq!(prompt, PROMPT.as_bytes());
        assert_eq!(self.read_line().await?, format!("Welcome, {username}"));
        Ok(())
    }
}

/// Server end of a pipe whose writes fail with `BrokenPipe` once `broken` is set
struct FlakyStream {
    inner: DuplexStream,
    broken: Arc<AtomicBool>,
}

impl AsyncRead for FlakyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FlakyStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.broken.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

fn start_room(config: &ServerConfig) -> RoomHandle {
    Room::spawn(config)
}

/// Run `handle_connection` over an in-memory pipe and log in as `username`
async fn join(
    room: &RoomHandle,
    config: &Arc<ServerConfig>,
    username: &str,
    buffer: usize,
) -> Result<(MemoryClient, JoinHandle<Result<(), AppError>>)> {
    let (client, server) = tokio::io::duplex(buffer);
    join_over(room, config, username, client, server).await
}

/// Like `join`, with a caller-supplied server end
async fn join_over<S>(
    room: &RoomHandle,
    config: &Arc<ServerConfig>,
    username: &str,
    client: DuplexStream,
    server: S,
) -> Result<(MemoryClient, JoinHandle<Result<(), AppError>>)>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let room = room.clone();
    let config = Arc::clone(config);
    let task = tokio::spawn(async move { handle_connection(server, room, &config).await });

    let mut client = MemoryClient::new(client);
    client.send_line(username).await?;
    client.expect_handshake(username).await?;
    assert_eq!(
        client.read_line().await?,
        format!("*** {username} just joined the chatroom")
    );
    Ok((client, task))
}

#[tokio::test]
async fn login_then_join_reaches_active() -> Result<()> {
    let config = ServerConfig::default();
    let room = start_room(&config);

    let (client, server) = tokio::io::duplex(1024);
    let mut client = MemoryClient::new(client);
    client.send_line("alice").await?;

    let participant = Participant::new(server, config.outbox_capacity, config.max_line_bytes);
    let (handle, session) = participant.login(&config.server_name).await?;
    let state = handle.state().clone();
    assert_eq!(handle.username(), "alice");
    assert_eq!(state.phase(), ConnectionPhase::Connected);

    client.expect_handshake("alice").await?;

    room.join(handle).await?;
    let pumps = tokio::spawn(session.run(room.clone()));

    // The join notice is written by the write pump, so it only arrives once Active.
    assert_eq!(client.read_line().await?, "*** alice just joined the chatroom");
    assert_eq!(state.phase(), ConnectionPhase::Active);
    assert_eq!(room.members().await?, vec!["alice"]);

    drop(client);
    timeout(READ_TIMEOUT, pumps).await??;
    assert_eq!(state.phase(), ConnectionPhase::Closed);
    assert!(room.members().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn login_abort_returns_error_and_skips_room() -> Result<()> {
    let config = Arc::new(ServerConfig::default());
    let room = start_room(&config);

    let (client, server) = tokio::io::duplex(1024);
    let task = tokio::spawn({
        let room = room.clone();
        let config = Arc::clone(&config);
        async move { handle_connection(server, room, &config).await }
    });
    drop(client);

    let result = timeout(READ_TIMEOUT, task).await??;
    assert!(matches!(
        result,
        Err(AppError::LoginAborted) | Err(AppError::Io(_))
    ));
    assert!(room.members().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn dropped_peer_does_not_affect_others() -> Result<()> {
    let config = Arc::new(ServerConfig::default());
    let room = start_room(&config);

    let (bob, bob_task) = join(&room, &config, "bob", 1024).await?;
    let (mut carol, _carol_task) = join(&room, &config, "carol", 1024).await?;

    drop(bob);
    assert_eq!(carol.read_line().await?, "*** bob has disconnected");
    timeout(READ_TIMEOUT, bob_task).await???;

    carol.send_line("still here").await?;
    assert_eq!(carol.read_line().await?, "[carol] still here");
    assert_eq!(room.members().await?, vec!["carol"]);
    Ok(())
}

#[tokio::test]
async fn slow_reader_does_not_stall_the_room() -> Result<()> {
    let config = Arc::new(ServerConfig {
        outbox_capacity: 4,
        duplicate_policy: DuplicatePolicy::Takeover,
        ..ServerConfig::default()
    });
    let room = start_room(&config);

    // A tiny pipe that is never drained after login.
    let (mut stuck, _stuck_task) = join(&room, &config, "stuck", 64).await?;
    let (mut carol, _carol_task) = join(&room, &config, "carol", 64 * 1024).await?;
    assert_eq!(stuck.read_line().await?, "*** carol just joined the chatroom");

    // Each echo needs a full pass through the Room, long after stuck's outbox is full.
    for i in 0..200 {
        carol.send_line(&format!("message {i}")).await?;
        assert_eq!(carol.read_line().await?, format!("[carol] message {i}"));
    }

    assert_eq!(room.members().await?, vec!["carol", "stuck"]);
    Ok(())
}

#[tokio::test]
async fn write_failure_during_broadcast_drops_only_that_member() -> Result<()> {
    let config = Arc::new(ServerConfig::default());
    let room = start_room(&config);

    let broken = Arc::new(AtomicBool::new(false));
    let (client, server) = tokio::io::duplex(1024);
    let server = FlakyStream {
        inner: server,
        broken: Arc::clone(&broken),
    };
    let (mut bee, bee_task) = join_over(&room, &config, "bee", client, server).await?;
    let (mut cee, _cee_task) = join(&room, &config, "cee", 1024).await?;
    assert_eq!(bee.read_line().await?, "*** cee just joined the chatroom");

    broken.store(true, Ordering::SeqCst);
    cee.send_line("boom").await?;

    assert_eq!(cee.read_line().await?, "[cee] boom");
    assert_eq!(cee.read_line().await?, "*** bee has disconnected");
    timeout(READ_TIMEOUT, bee_task).await???;

    // A second notice would arrive before this echo.
    cee.send_line("again").await?;
    assert_eq!(cee.read_line().await?, "[cee] again");
    assert_eq!(room.members().await?, vec!["cee"]);
    Ok(())
}

#[tokio::test]
async fn long_line_is_relayed_in_chunks_without_disconnect() -> Result<()> {
    let config = Arc::new(ServerConfig::default());
    let room = start_room(&config);

    let (mut alice, _alice_task) = join(&room, &config, "alice", 16 * 1024).await?;
    let (mut bob, _bob_task) = join(&room, &config, "bob", 16 * 1024).await?;
    assert_eq!(alice.read_line().await?, "*** bob just joined the chatroom");

    let limit = config.max_line_bytes;
    alice.send_line(&"x".repeat(limit + 904)).await?;

    assert_eq!(bob.read_line().await?, format!("[alice] {}", "x".repeat(limit)));
    assert_eq!(bob.read_line().await?, format!("[alice] {}", "x".repeat(904)));

    alice.send_line("short").await?;
    assert_eq!(bob.read_line().await?, "[alice] short");
    assert_eq!(room.members().await?, vec!["alice", "bob"]);
    Ok(())
}
