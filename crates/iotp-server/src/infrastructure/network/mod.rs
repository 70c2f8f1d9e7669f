//! Network infrastructure for the server application.
//!
//! # Sub-modules
//!
//! - **`listener`** – Binds the TCP port and runs the accept loop.  Every
//!   accepted connection is registered and handed to its own Tokio task.
//!   On shutdown it marks every session for termination and waits for the
//!   registry to drain.
//!
//! - **`session`** – Drives one connection: reads hex lines with a bounded
//!   wait, feeds them to the server DFA, writes replies, and between reads
//!   flushes queued UPDATEs and checks the termination flag.

pub mod listener;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use iotp_core::dfa::SessionId;
use iotp_core::{Authenticator, Broadcaster, ServerDfa, SharedHome};

use crate::application::SessionRegistry;

pub use listener::{bind, run_server};
pub use session::{ServerSession, SessionEnd, SessionError};

/// Everything a session needs that is shared by the whole server.
#[derive(Debug)]
pub struct ServerContext {
    pub registry: Arc<SessionRegistry>,
    pub home: Arc<SharedHome>,
    pub authenticator: Authenticator,
    pub version: String,
    pub read_timeout: Duration,
}

impl ServerContext {
    pub fn new(
        home: SharedHome,
        authenticator: Authenticator,
        version: impl Into<String>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            home: Arc::new(home),
            authenticator,
            version: version.into(),
            read_timeout,
        }
    }

    /// Builds a fresh server DFA for session `id`.
    pub fn new_dfa(&self, id: SessionId) -> ServerDfa {
        let broadcaster: Arc<dyn Broadcaster> = self.registry.clone();
        ServerDfa::new(
            id,
            self.version.clone(),
            self.authenticator.clone(),
            Arc::clone(&self.home),
            broadcaster,
        )
    }
}
