//! ClientSession: drives one connection to the server with a client DFA.
//!
//! # The session loop (for beginners)
//!
//! ```text
//!   process(INTERNAL) ─► write PING
//!           │
//!           ▼
//!   wait ≤ read_timeout for one line ◄───────────────────────┐
//!           │                                                 │
//!     line? ├── yes ─► decode ─► dfa.process ─► write reply   │
//!           │                         │                       │
//!           │                 WAIT_USER_INPUT?                │
//!           │                         └─► start collecting    │
//!           ▼                                                 │
//!   shutdown requested? ── yes ─► send TERMINATE              │
//!           │                                                 │
//!           ▼                                                 │
//!   action posted by the collector? ── yes ─► send ACTION ────┘
//! ```
//!
//! Collecting an action runs in its own task so the session keeps reading.
//! When an UPDATE arrives mid-collection the DFA asks for input again; the
//! old collection is cancelled and a new one starts against the updated
//! home.
//!
//! # When does a session end?
//!
//! - The server sends TERMINATE, either echoing ours or because it is
//!   shutting down.  The server closes right after, so it is not echoed.
//! - The server sends any ERROR.
//! - The client itself detects a violation and reports it to the server.
//! - The stream closes or fails.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use iotp_core::dfa::Violation;
use iotp_core::protocol::{Frame, LineReader, SequenceCounter, MAX_LINE_LEN};
use iotp_core::{
    decode_line, encode_line, ClientDfa, Keycode, Message, ProtocolDfa, ProtocolError,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::timeout;
use tracing::{debug, info, trace};

use crate::application::{ActionRequest, ActionSource, CancelFlag};
use crate::infrastructure::network::SessionError;

/// Why a session ended normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEnd {
    /// We sent TERMINATE and the server confirmed it.
    Terminated,
    /// The server sent TERMINATE on its own, usually because it is shutting
    /// down.
    ServerTerminated,
    /// The server reported an error, for example a failed login.
    ServerError(String),
    /// We rejected something the server sent and told it so.
    ProtocolError(String),
}

impl fmt::Display for ClientEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientEnd::Terminated => f.write_str("terminated"),
            ClientEnd::ServerTerminated => f.write_str("terminated by server"),
            ClientEnd::ServerError(reason) => write!(f, "server error: {reason}"),
            ClientEnd::ProtocolError(reason) => write!(f, "protocol error: {reason}"),
        }
    }
}

/// One connection, its client DFA and the source of user actions.
pub struct ClientSession<S> {
    stream: S,
    dfa: ClientDfa,
    source: Arc<dyn ActionSource>,
    read_timeout: Duration,
    running: Arc<AtomicBool>,
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Clearing `running` makes the session send TERMINATE at its next
    /// bounded wait.
    pub fn new(
        stream: S,
        dfa: ClientDfa,
        source: Arc<dyn ActionSource>,
        read_timeout: Duration,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            stream,
            dfa,
            source,
            read_timeout,
            running,
        }
    }

    /// Runs the session until it ends.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectionLost`] if the server closes the
    /// stream unexpectedly, [`SessionError::Io`] on socket errors, and
    /// [`SessionError::Encode`] if the DFA produced a message that has no
    /// wire form.
    pub async fn run(self) -> Result<ClientEnd, SessionError> {
        let Self {
            stream,
            dfa,
            source,
            read_timeout,
            running,
        } = self;
        let (reader, writer) = tokio::io::split(stream);
        let mut lines = LineReader::new(BufReader::new(reader));
        let mut driver = Driver {
            writer,
            dfa,
            source,
            collection: None,
            sequence: SequenceCounter::new(),
            terminate_sent: false,
        };

        let hello = driver.dfa.process(Message::internal());
        if let Some(end) = driver.dispatch(hello).await? {
            return Ok(end);
        }

        loop {
            match timeout(read_timeout, lines.next_frame()).await {
                Ok(Ok(Some(Frame::Line(line)))) => {
                    if let Some(end) = driver.on_line(&line).await? {
                        return Ok(end);
                    }
                }
                Ok(Ok(Some(Frame::TooLong))) => {
                    debug!("server line longer than {MAX_LINE_LEN} bytes");
                    let reply = driver
                        .dfa
                        .reject(Violation::Malformed(ProtocolError::LineTooLong(MAX_LINE_LEN)));
                    if let Some(end) = driver.dispatch(Some(reply)).await? {
                        return Ok(end);
                    }
                }
                Ok(Ok(None)) if driver.terminate_sent => return Ok(ClientEnd::Terminated),
                Ok(Ok(None)) => return Err(SessionError::ConnectionLost),
                Ok(Err(e)) => return Err(e.into()),
                Err(_elapsed) => trace!("read wait elapsed"),
            }

            if !running.load(Ordering::Relaxed) {
                driver.send_terminate().await?;
            }

            if let Some(request) = driver.take_posted() {
                if let Some(end) = driver.on_posted(request).await? {
                    return Ok(end);
                }
            }
        }
    }
}

// ── Action collection ─────────────────────────────────────────────────────────

/// One running request to the [`ActionSource`].  Dropping it cancels the
/// request.
struct Collection {
    cancel: CancelFlag,
    posted: oneshot::Receiver<Option<ActionRequest>>,
}

impl Collection {
    fn start(source: &Arc<dyn ActionSource>, dfa: &ClientDfa) -> Self {
        let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
        let (tx, posted) = oneshot::channel();
        let source = Arc::clone(source);
        let home = dfa.home().cloned().unwrap_or_default();
        let flag = Arc::clone(&cancel);
        tokio::spawn(async move {
            let request = source.next_action(home, flag).await;
            // The session may have moved on; nobody listening is fine.
            let _ = tx.send(request);
        });
        Self { cancel, posted }
    }
}

impl Drop for Collection {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

// ── Driver ────────────────────────────────────────────────────────────────────

/// The session's mutable state once the stream has been split.
struct Driver<W> {
    writer: W,
    dfa: ClientDfa,
    source: Arc<dyn ActionSource>,
    collection: Option<Collection>,
    sequence: SequenceCounter,
    terminate_sent: bool,
}

impl<W> Driver<W>
where
    W: AsyncWrite + Unpin,
{
    /// Acts on one DFA output.
    async fn dispatch(&mut self, output: Option<Message>) -> Result<Option<ClientEnd>, SessionError> {
        let Some(msg) = output else {
            return Ok(None);
        };
        if msg.is(Keycode::WaitUserInput) {
            self.collection = Some(Collection::start(&self.source, &self.dfa));
            return Ok(None);
        }
        self.write(&msg).await?;
        if msg.is(Keycode::Error) {
            self.collection = None;
            return Ok(Some(ClientEnd::ProtocolError(error_text(&msg))));
        }
        Ok(None)
    }

    async fn on_line(&mut self, line: &[u8]) -> Result<Option<ClientEnd>, SessionError> {
        let text = String::from_utf8_lossy(line);
        let msg = match decode_line(line) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(line = text.trim_end(), "undecodable line: {e}");
                let reply = self.dfa.reject(Violation::Malformed(e));
                return self.dispatch(Some(reply)).await;
            }
        };
        debug!(keycode = %msg.keycode(), line = text.trim_end(), "received");

        if msg.is(Keycode::Terminate) {
            self.collection = None;
            self.dfa.process(msg);
            return Ok(Some(if self.terminate_sent {
                ClientEnd::Terminated
            } else {
                ClientEnd::ServerTerminated
            }));
        }
        if msg.is(Keycode::Error) {
            self.collection = None;
            let reason = error_text(&msg);
            self.dfa.process(msg);
            return Ok(Some(ClientEnd::ServerError(reason)));
        }

        let output = self.dfa.process(msg);
        self.dispatch(output).await
    }

    /// Returns what the collector posted, if it has finished.
    fn take_posted(&mut self) -> Option<Option<ActionRequest>> {
        let collection = self.collection.as_mut()?;
        let posted = match collection.posted.try_recv() {
            Ok(request) => request,
            Err(TryRecvError::Empty) => return None,
            // The collector task died without answering.
            Err(TryRecvError::Closed) => None,
        };
        self.collection = None;
        Some(posted)
    }

    async fn on_posted(
        &mut self,
        request: Option<ActionRequest>,
    ) -> Result<Option<ClientEnd>, SessionError> {
        match request {
            Some(request @ ActionRequest::Act { .. }) => {
                let Some(action) = request.into_action(self.sequence.next_u8()) else {
                    return Ok(None);
                };
                info!(%action, "sending action");
                let output = self.dfa.process(Message::action(&action));
                self.dispatch(output).await
            }
            Some(ActionRequest::Terminate) | None => {
                self.send_terminate().await?;
                Ok(None)
            }
        }
    }

    /// Sends TERMINATE once and waits for the server's echo.
    async fn send_terminate(&mut self) -> Result<(), SessionError> {
        if self.terminate_sent {
            return Ok(());
        }
        self.collection = None;
        if let Some(bye) = self.dfa.process(Message::terminate()) {
            self.write(&bye).await?;
        }
        self.terminate_sent = true;
        info!("terminate sent");
        Ok(())
    }

    async fn write(&mut self, msg: &Message) -> Result<(), SessionError> {
        let line = encode_line(msg)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        debug!(keycode = %msg.keycode(), line = line.trim_end(), "sent");
        Ok(())
    }
}

fn error_text(msg: &Message) -> String {
    String::from_utf8_lossy(msg.payload()).into_owned()
}
