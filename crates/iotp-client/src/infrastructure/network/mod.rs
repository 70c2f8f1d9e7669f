//! Network infrastructure for the client application.
//!
//! # Sub-modules
//!
//! - **`session`** – Drives one connection: writes the opening PING, reads
//!   hex lines with a bounded wait, feeds them to the client DFA, and hands
//!   "waiting for user input" to an [`ActionSource`](crate::application::ActionSource).

pub mod session;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use iotp_core::{ClientDfa, ProtocolError};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::application::ActionSource;

pub use session::{ClientEnd, ClientSession};

/// Error type for a client session that could not run to a normal end.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server closed the connection")]
    ConnectionLost,

    #[error("cannot encode outgoing message: {0}")]
    Encode(#[from] ProtocolError),
}

/// Opens a TCP connection to the server at `addr` (`host:port`).
///
/// # Errors
///
/// Returns [`SessionError::Connect`] if the server cannot be reached.
pub async fn connect(addr: &str) -> Result<TcpStream, SessionError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| SessionError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    if let Err(e) = stream.set_nodelay(true) {
        warn!("could not disable Nagle: {e}");
    }
    info!("connected to IOTP server at {addr}");
    Ok(stream)
}

/// Connects to `addr` and runs one interactive session to its end.
///
/// # Errors
///
/// Returns a [`SessionError`] if the connection fails or is lost.
pub async fn run_session(
    addr: &str,
    dfa: ClientDfa,
    source: Arc<dyn ActionSource>,
    read_timeout: Duration,
    running: Arc<AtomicBool>,
) -> Result<ClientEnd, SessionError> {
    let stream = connect(addr).await?;
    ClientSession::new(stream, dfa, source, read_timeout, running)
        .run()
        .await
}
