//! TCP accept loop with cooperative shutdown.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting connections with a bounded wait so the loop can observe the
//!    `running` flag even when nobody connects.
//! 3. Registering each connection and running its session in a dedicated
//!    Tokio task.
//! 4. Draining on shutdown: every session is marked for termination and the
//!    loop waits until the registry is empty.  Sessions are never killed;
//!    each one sends TERMINATE to its peer and deregisters itself.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use iotp_core::dfa::SessionId;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::application::{SessionRegistration, SessionRegistry};
use crate::infrastructure::network::session::{ServerSession, SessionError};
use crate::infrastructure::network::ServerContext;

/// How often the shutdown drain re-checks the registry.
const DRAIN_POLL: Duration = Duration::from_millis(50);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the server's TCP listener.
///
/// # Errors
///
/// Returns an error if the port is already in use or the process lacks
/// permission to bind.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind IOTP listener on {addr}"))?;
    info!("IOTP server listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Runs the accept loop until `running` is cleared, then drains every
/// session.
///
/// # Errors
///
/// Currently infallible once the listener is bound; accept errors are logged
/// and the loop continues.
pub async fn run_server(
    listener: TcpListener,
    context: Arc<ServerContext>,
    listen_timeout: Duration,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(listen_timeout, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                let registration = context.registry.register();
                info!(session = registration.id, "new connection from {peer_addr}");
                let ctx = Arc::clone(&context);
                tokio::spawn(async move {
                    handle_session(stream, peer_addr, registration, ctx).await;
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {
                // No connection within the bounded wait; re-check the flag.
            }
        }
    }

    drop(listener);
    drain(&context.registry).await;
    Ok(())
}

/// Marks every session for termination and waits until all have left.
async fn drain(registry: &SessionRegistry) {
    registry.terminate_all();
    while !registry.is_empty() {
        sleep(DRAIN_POLL).await;
    }
    info!("all sessions closed");
}

// ── Per-session handler ───────────────────────────────────────────────────────

/// Removes a session from the registry when its task ends, however it ends.
struct Deregister<'a> {
    registry: &'a SessionRegistry,
    id: SessionId,
}

impl Drop for Deregister<'_> {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

/// Runs one session and logs the outcome.
async fn handle_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registration: SessionRegistration,
    context: Arc<ServerContext>,
) {
    let id = registration.id;
    let _deregister = Deregister {
        registry: &context.registry,
        id,
    };
    if let Err(e) = stream.set_nodelay(true) {
        warn!(session = id, "could not disable Nagle: {e}");
    }

    let session = ServerSession::new(stream, context.new_dfa(id), registration, context.read_timeout);
    match session.run().await {
        Ok(end) => info!(session = id, "session {peer_addr} closed: {end}"),
        Err(SessionError::ConnectionLost) => info!(session = id, "session {peer_addr} disconnected"),
        Err(e) => warn!(session = id, "session {peer_addr} closed with error: {e}"),
    }
}
