//! ServerSession: drives one client connection with a server DFA.
//!
//! # The session loop (for beginners)
//!
//! ```text
//!           ┌─────────────────────────────────────────────┐
//!           ▼                                             │
//!   wait ≤ read_timeout for one line                      │
//!           │                                             │
//!     line? ├── yes ─► decode ─► dfa.process ─► write reply
//!           │                                             │
//!           ▼                                             │
//!   termination flag set? ── yes ─► send TERMINATE, stop  │
//!           │ no                                          │
//!           ▼                                             │
//!   write queued UPDATEs ─────────────────────────────────┘
//! ```
//!
//! The read never blocks forever, so even an idle connection notices a server
//! shutdown within one `read_timeout`.
//!
//! # When does a session close?
//!
//! - After writing TERMINATE, whether the peer asked for it or the server is
//!   shutting down.
//! - After writing `ERROR Failed authentication`.
//! - After answering a line longer than [`MAX_LINE_LEN`] with
//!   `ERROR General error`.
//! - When the peer closes the stream or an I/O error occurs.
//!
//! Any other ERROR reply leaves the connection open with the DFA back in
//! `Idle`, so the peer may start the handshake again.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use iotp_core::dfa::{SessionId, Violation};
use iotp_core::protocol::{Frame, LineReader, MAX_LINE_LEN};
use iotp_core::{
    decode_line, encode_line, Keycode, Message, ProtocolDfa, ProtocolError, ProtocolState,
    ServerDfa,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::application::SessionRegistration;

/// Error type for a session that ended abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer closed the connection")]
    ConnectionLost,

    #[error("cannot encode outgoing message: {0}")]
    Encode(#[from] ProtocolError),
}

/// Why a session ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer sent TERMINATE and it was echoed.
    PeerTerminated,
    /// The server is shutting down and sent TERMINATE.
    ServerShutdown,
    /// The peer failed the challenge.
    AuthenticationFailed,
    /// The peer sent a line longer than [`MAX_LINE_LEN`].
    LineTooLong,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SessionEnd::PeerTerminated => "terminated by peer",
            SessionEnd::ServerShutdown => "server shutdown",
            SessionEnd::AuthenticationFailed => "authentication failed",
            SessionEnd::LineTooLong => "line too long",
        };
        f.write_str(text)
    }
}

/// One connection, its server DFA and its UPDATE queue.
pub struct ServerSession<S> {
    stream: S,
    dfa: ServerDfa,
    updates: mpsc::UnboundedReceiver<Message>,
    terminate: Arc<AtomicBool>,
    read_timeout: Duration,
}

impl<S> ServerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        dfa: ServerDfa,
        registration: SessionRegistration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            stream,
            dfa,
            updates: registration.updates,
            terminate: registration.terminate,
            read_timeout,
        }
    }

    /// Runs the session until it closes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectionLost`] if the peer closes the stream,
    /// [`SessionError::Io`] on socket errors, and [`SessionError::Encode`] if
    /// the DFA produced a message that has no wire form.
    pub async fn run(self) -> Result<SessionEnd, SessionError> {
        let Self {
            stream,
            mut dfa,
            mut updates,
            terminate,
            read_timeout,
        } = self;
        let id = dfa.session_id();
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = LineReader::new(BufReader::new(reader));

        loop {
            // `next_frame` is cancel safe, so a timeout never loses a
            // partially read line.
            match timeout(read_timeout, lines.next_frame()).await {
                Ok(Ok(Some(Frame::Line(line)))) => {
                    if let Some(reply) = handle_line(&mut dfa, id, &line) {
                        write_message(&mut writer, id, &reply).await?;
                        if reply.is(Keycode::Terminate) {
                            return Ok(SessionEnd::PeerTerminated);
                        }
                        if reply == Message::error_auth() {
                            return Ok(SessionEnd::AuthenticationFailed);
                        }
                    }
                }
                Ok(Ok(Some(Frame::TooLong))) => {
                    debug!(session = id, "line longer than {MAX_LINE_LEN} bytes");
                    let reply = dfa.reject(Violation::Malformed(ProtocolError::LineTooLong(
                        MAX_LINE_LEN,
                    )));
                    write_message(&mut writer, id, &reply).await?;
                    return Ok(SessionEnd::LineTooLong);
                }
                Ok(Ok(None)) => return Err(SessionError::ConnectionLost),
                Ok(Err(e)) => return Err(e.into()),
                Err(_elapsed) => trace!(session = id, "read wait elapsed"),
            }

            if terminate.load(Ordering::Relaxed) {
                if let Some(bye) = dfa.process(Message::terminate()) {
                    write_message(&mut writer, id, &bye).await?;
                }
                return Ok(SessionEnd::ServerShutdown);
            }

            flush_updates(&mut dfa, &mut updates, &mut writer).await?;
        }
    }
}

/// Decodes one inbound line and feeds it to the DFA.
fn handle_line(dfa: &mut ServerDfa, id: SessionId, line: &[u8]) -> Option<Message> {
    let text = String::from_utf8_lossy(line);
    match decode_line(line) {
        Ok(msg) => {
            debug!(session = id, keycode = %msg.keycode(), line = text.trim_end(), "received");
            dfa.process(msg)
        }
        Err(e) => {
            debug!(session = id, line = text.trim_end(), "undecodable line: {e}");
            Some(dfa.reject(Violation::Malformed(e)))
        }
    }
}

/// Writes every queued UPDATE if the client is in the action loop.
///
/// A session only gets updates while subscribed, but one can still be queued
/// just before a reset; those are dropped because the peer no longer holds a
/// home to apply them to.
async fn flush_updates<W>(
    dfa: &mut ServerDfa,
    updates: &mut mpsc::UnboundedReceiver<Message>,
    writer: &mut W,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let id = dfa.session_id();
    while let Ok(update) = updates.try_recv() {
        if dfa.state() == ProtocolState::ServerAwaitsAction {
            write_message(writer, id, &update).await?;
        } else {
            debug!(session = id, state = %dfa.state(), "dropping update for session outside the action loop");
        }
    }
    Ok(())
}

async fn write_message<W>(writer: &mut W, id: SessionId, msg: &Message) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_line(msg)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    debug!(session = id, keycode = %msg.keycode(), line = line.trim_end(), "sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::ServerContext;
    use iotp_core::auth::{build_user_response, Secret};
    use iotp_core::devices::{Device, DeviceType, Home};
    use iotp_core::{Authenticator, CredentialStore, DeviceAction, SharedHome, PROTOCOL_VERSION};
    use mockall::mock;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    mock! {
        Store {}
        impl CredentialStore for Store {
            fn lookup_secret(&self, username: &str) -> Option<Secret>;
            fn user_count(&self) -> usize;
        }
    }

    const READ_TIMEOUT: Duration = Duration::from_millis(20);

    fn single_user_store() -> MockStore {
        let mut store = MockStore::new();
        store
            .expect_lookup_secret()
            .returning(|user| (user == "abhi").then(|| iotp_core::auth::derive_secret("abhi1234")));
        store.expect_user_count().return_const(1usize);
        store
    }

    fn context() -> Arc<ServerContext> {
        let mut home = Home::new();
        home.add_device(Device::new(DeviceType::Light, "kitchen light", 0, vec![0]).unwrap())
            .unwrap();
        Arc::new(ServerContext::new(
            SharedHome::new(home),
            Authenticator::new(Arc::new(single_user_store())),
            PROTOCOL_VERSION,
            READ_TIMEOUT,
        ))
    }

    /// Test-side end of an in-memory connection.
    struct Peer {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Peer {
        async fn send(&mut self, msg: &Message) {
            let line = encode_line(msg).unwrap();
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }

        async fn send_raw(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }

        async fn recv(&mut self) -> Message {
            let line = self.lines.next_line().await.unwrap().expect("session closed");
            decode_line(&line).unwrap()
        }

        async fn handshake(&mut self, password: &str) -> Message {
            self.send(&Message::ping()).await;
            assert_eq!(self.recv().await, Message::version(PROTOCOL_VERSION));
            self.send(&Message::version(PROTOCOL_VERSION)).await;
            let challenge = self.recv().await;
            let body = build_user_response("abhi", password, challenge.payload());
            self.send(&Message::response(body)).await;
            self.recv().await
        }
    }

    fn start(context: &Arc<ServerContext>) -> (Peer, Arc<AtomicBool>, JoinHandle<Result<SessionEnd, SessionError>>) {
        let (client_side, server_side) = duplex(4096);
        let registration = context.registry.register();
        let terminate = Arc::clone(&registration.terminate);
        let session = ServerSession::new(
            server_side,
            context.new_dfa(registration.id),
            registration,
            READ_TIMEOUT,
        );
        let handle = tokio::spawn(session.run());
        let (reader, writer) = tokio::io::split(client_side);
        let peer = Peer {
            lines: BufReader::new(reader).lines(),
            writer,
        };
        (peer, terminate, handle)
    }

    #[tokio::test]
    async fn test_handshake_yields_initial_snapshot() {
        // Arrange
        let ctx = context();
        let (mut peer, _, _) = start(&ctx);

        // Act
        let initial = peer.handshake("abhi1234").await;

        // Assert
        assert_eq!(initial, Message::initial(ctx.home.snapshot_bytes()));
    }

    #[tokio::test]
    async fn test_failed_authentication_closes_session() {
        // Arrange
        let ctx = context();
        let (mut peer, _, handle) = start(&ctx);

        // Act
        let reply = peer.handshake("wrong").await;

        // Assert
        assert_eq!(reply, Message::error_auth());
        assert_eq!(handle.await.unwrap().unwrap(), SessionEnd::AuthenticationFailed);
    }

    #[tokio::test]
    async fn test_undecodable_line_is_general_error_and_session_stays_open() {
        // Arrange
        let ctx = context();
        let (mut peer, _, _) = start(&ctx);

        // Act
        peer.send_raw("zz-not-hex\n").await;
        let error = peer.recv().await;
        peer.send(&Message::ping()).await;

        // Assert
        assert_eq!(error, Message::error_general());
        assert_eq!(peer.recv().await, Message::version(PROTOCOL_VERSION));
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_general_error_and_session_stays_open() {
        // Arrange
        let ctx = context();
        let (mut peer, _, _) = start(&ctx);

        // Act
        peer.writer.write_all(&[0xFF, 0xFE, b'\n']).await.unwrap();
        let error = peer.recv().await;
        peer.send(&Message::ping()).await;

        // Assert
        assert_eq!(error, Message::error_general());
        assert_eq!(peer.recv().await, Message::version(PROTOCOL_VERSION));
    }

    #[tokio::test]
    async fn test_over_long_line_is_general_error_then_session_closes() {
        // Arrange
        let ctx = context();
        let (mut peer, _, handle) = start(&ctx);
        let flood = vec![b'0'; MAX_LINE_LEN + 2];

        // Act – the newline never arrives
        let writer = tokio::spawn(async move {
            let _ = peer.writer.write_all(&flood).await;
            peer
        });
        let end = handle.await.unwrap().unwrap();
        let mut peer = writer.await.unwrap();

        // Assert
        assert_eq!(end, SessionEnd::LineTooLong);
        assert_eq!(peer.recv().await, Message::error_general());
    }

    #[tokio::test]
    async fn test_peer_terminate_is_echoed_then_session_ends() {
        let ctx = context();
        let (mut peer, _, handle) = start(&ctx);

        peer.send(&Message::terminate()).await;

        assert_eq!(peer.recv().await, Message::terminate());
        assert_eq!(handle.await.unwrap().unwrap(), SessionEnd::PeerTerminated);
    }

    #[tokio::test]
    async fn test_termination_flag_sends_terminate_at_next_wait() {
        // Arrange
        let ctx = context();
        let (mut peer, terminate, handle) = start(&ctx);

        // Act
        terminate.store(true, Ordering::Relaxed);

        // Assert
        assert_eq!(peer.recv().await, Message::terminate());
        assert_eq!(handle.await.unwrap().unwrap(), SessionEnd::ServerShutdown);
    }

    #[tokio::test]
    async fn test_queued_update_is_written_to_subscribed_peer() {
        // Arrange
        let ctx = context();
        let (mut peer, _, _) = start(&ctx);
        peer.handshake("abhi1234").await;
        let update = Message::update(&DeviceAction::new(0, 0, 0, 0, vec![]));

        // Act – another session's action is broadcast with a foreign origin
        iotp_core::Broadcaster::broadcast(ctx.registry.as_ref(), &update, 999);

        // Assert
        assert_eq!(peer.recv().await, update);
    }

    #[tokio::test]
    async fn test_closed_stream_is_connection_lost() {
        let ctx = context();
        let (peer, _, handle) = start(&ctx);

        drop(peer);

        assert!(matches!(
            handle.await.unwrap(),
            Err(SessionError::ConnectionLost)
        ));
    }
}
