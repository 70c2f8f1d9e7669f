//! SessionRegistry: the set of live sessions and the UPDATE fan-out.
//!
//! Every accepted connection registers here before its session task starts
//! and deregisters when the task ends.  Each entry holds:
//!
//! - An unbounded outbound queue of UPDATE messages.  The session drains it
//!   between reads and writes the updates to its socket.
//! - A termination flag the session checks after every bounded wait.
//! - Whether the session currently receives updates at all.
//!
//! # Who gets an UPDATE? (for beginners)
//!
//! A session only needs updates once it holds a copy of the home, that is
//! after its INITIAL snapshot.  The server DFA subscribes the session in the
//! same critical section that takes the snapshot and unsubscribes it when the
//! DFA falls back to `Idle`.  [`broadcast`](SessionRegistry::broadcast) then
//! queues the update on every subscribed session except the one whose action
//! caused it; that session gets a CONFIRM instead.
//!
//! # Locking
//!
//! `broadcast` and `subscribe` are called while the home lock is held, so the
//! registry lock is always taken second.  Nothing in here ever touches the
//! home, which keeps the lock order one-directional.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use iotp_core::dfa::SessionId;
use iotp_core::protocol::SequenceCounter;
use iotp_core::{Broadcaster, Message};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Registry-side view of one live session.
#[derive(Debug)]
struct SessionHandle {
    updates: mpsc::UnboundedSender<Message>,
    terminate: Arc<AtomicBool>,
    subscribed: bool,
}

/// What a newly registered session needs to run.
#[derive(Debug)]
pub struct SessionRegistration {
    pub id: SessionId,
    pub updates: mpsc::UnboundedReceiver<Message>,
    pub terminate: Arc<AtomicBool>,
}

/// Concurrency-safe set of live sessions ordered by id.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<SessionId, SessionHandle>>,
    ids: SequenceCounter,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Creates an empty registry.  Session ids start at 1.
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(BTreeMap::new()),
            ids: SequenceCounter::starting_at(1),
        }
    }

    /// Allocates the next session id and registers an unsubscribed entry.
    pub fn register(&self) -> SessionRegistration {
        let id = self.ids.next();
        let (tx, rx) = mpsc::unbounded_channel();
        let terminate = Arc::new(AtomicBool::new(false));
        self.lock().insert(
            id,
            SessionHandle {
                updates: tx,
                terminate: Arc::clone(&terminate),
                subscribed: false,
            },
        );
        debug!(session = id, "session registered");
        SessionRegistration {
            id,
            updates: rx,
            terminate,
        }
    }

    /// Removes a session.  Unknown ids are ignored.
    pub fn deregister(&self, id: SessionId) {
        if self.lock().remove(&id).is_some() {
            debug!(session = id, "session deregistered");
        }
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ids of every registered session in ascending order.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.lock().keys().copied().collect()
    }

    /// Marks every registered session for termination.
    ///
    /// Sessions notice the flag at their next bounded wait, send TERMINATE
    /// to their peer and deregister themselves.
    pub fn terminate_all(&self) {
        let sessions = self.lock();
        for handle in sessions.values() {
            handle.terminate.store(true, Ordering::Relaxed);
        }
        info!(sessions = sessions.len(), "all sessions marked for termination");
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<SessionId, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_subscribed(&self, id: SessionId, subscribed: bool) {
        if let Some(handle) = self.lock().get_mut(&id) {
            handle.subscribed = subscribed;
            trace!(session = id, subscribed, "subscription changed");
        }
    }
}

impl Broadcaster for SessionRegistry {
    fn broadcast(&self, update: &Message, origin: SessionId) {
        let sessions = self.lock();
        let mut delivered = 0usize;
        for (&id, handle) in sessions.iter() {
            if id == origin || !handle.subscribed {
                continue;
            }
            // A closed receiver means the session is already shutting down.
            if handle.updates.send(update.clone()).is_ok() {
                delivered += 1;
            }
        }
        debug!(origin, delivered, "update broadcast");
    }

    fn subscribe(&self, session: SessionId) {
        self.set_subscribed(session, true);
    }

    fn unsubscribe(&self, session: SessionId) {
        self.set_subscribed(session, false);
    }
}
