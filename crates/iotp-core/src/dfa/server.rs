//! Server role of the protocol state machine.
//!
//! The server answers a PING with its version, checks the client's version,
//! issues a fresh challenge, verifies the response, sends the home snapshot
//! and then loops applying ACTIONs to the shared home.  A successful action
//! is broadcast as an UPDATE to every other session before the originating
//! client gets its CONFIRM.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::auth::{self, Authenticator, CHALLENGE_LEN};
use crate::devices::SharedHome;
use crate::dfa::{Broadcaster, ProtocolDfa, ProtocolState, SessionId, Violation};
use crate::protocol::messages::{Keycode, Message};

/// Server-side state machine for one connection.
pub struct ServerDfa {
    session_id: SessionId,
    state: ProtocolState,
    version: String,
    authenticator: Authenticator,
    home: Arc<SharedHome>,
    broadcaster: Arc<dyn Broadcaster>,
    challenge: Option<[u8; CHALLENGE_LEN]>,
    pending_confirm: Option<Message>,
}

impl ServerDfa {
    pub fn new(
        session_id: SessionId,
        version: impl Into<String>,
        authenticator: Authenticator,
        home: Arc<SharedHome>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            session_id,
            state: ProtocolState::Idle,
            version: version.into(),
            authenticator,
            home,
            broadcaster,
            challenge: None,
            pending_confirm: None,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn enter(&mut self, next: ProtocolState) {
        trace!(session = self.session_id, from = %self.state, to = %next, "server transition");
        self.state = next;
    }

    fn violate(&mut self, violation: Violation) -> Option<Message> {
        Some(self.reject(violation))
    }

    /// Back to `Idle`: forget per-attempt values and stop receiving updates
    /// until the next INITIAL.
    fn reset(&mut self) {
        if matches!(
            self.state,
            ProtocolState::ServerAwaitsAction | ProtocolState::ClientAwaitsConfirm
        ) {
            self.broadcaster.unsubscribe(self.session_id);
        }
        self.challenge = None;
        self.pending_confirm = None;
        self.enter(ProtocolState::Idle);
    }

    fn unexpected(&mut self, keycode: Keycode) -> Option<Message> {
        let state = self.state;
        self.violate(Violation::Unexpected { state, keycode })
    }

    // ── Per-state handlers ────────────────────────────────────────────────────

    fn on_idle(&mut self, incoming: Message) -> Option<Message> {
        if !incoming.is(Keycode::Ping) {
            return self.unexpected(incoming.keycode());
        }
        if !incoming.payload().is_empty() {
            return self.violate(Violation::MalformedPing);
        }
        self.enter(ProtocolState::ClientAwaitsVersion);
        self.process(Message::internal())
    }

    fn on_client_awaits_version(&mut self, incoming: Message) -> Option<Message> {
        if !incoming.is(Keycode::Internal) {
            return self.unexpected(incoming.keycode());
        }
        self.enter(ProtocolState::ServerAwaitsVersion);
        Some(Message::version(&self.version))
    }

    fn on_server_awaits_version(&mut self, incoming: Message) -> Option<Message> {
        if !incoming.is(Keycode::Version) {
            return self.unexpected(incoming.keycode());
        }
        if incoming.text() != Some(self.version.as_str()) {
            let offered = String::from_utf8_lossy(incoming.payload()).into_owned();
            return self.violate(Violation::VersionMismatch(offered));
        }
        self.enter(ProtocolState::ClientAwaitsChallenge);
        self.process(Message::internal())
    }

    fn on_client_awaits_challenge(&mut self, incoming: Message) -> Option<Message> {
        if !incoming.is(Keycode::Internal) {
            return self.unexpected(incoming.keycode());
        }
        let challenge = auth::generate_challenge();
        self.challenge = Some(challenge);
        self.enter(ProtocolState::ServerAwaitsResponse);
        Some(Message::challenge(&challenge))
    }

    fn on_server_awaits_response(&mut self, incoming: Message) -> Option<Message> {
        if !incoming.is(Keycode::Response) {
            return self.unexpected(incoming.keycode());
        }
        // The challenge is single use whatever the outcome.
        let verified = match self.challenge.take() {
            Some(challenge) => self.authenticator.verify(&challenge, incoming.payload()),
            None => false,
        };
        if !verified {
            return self.violate(Violation::AuthenticationFailed);
        }
        info!(session = self.session_id, "client authenticated");
        self.enter(ProtocolState::ClientAwaitsInit);
        self.process(Message::internal())
    }

    fn on_client_awaits_init(&mut self, incoming: Message) -> Option<Message> {
        if !incoming.is(Keycode::Internal) {
            return self.unexpected(incoming.keycode());
        }
        self.enter(ProtocolState::ServerAwaitsAction);
        let (session_id, broadcaster) = (self.session_id, Arc::clone(&self.broadcaster));
        let snapshot = self
            .home
            .snapshot_bytes_then(|| broadcaster.subscribe(session_id));
        Some(Message::initial(snapshot))
    }

    fn on_server_awaits_action(&mut self, incoming: Message) -> Option<Message> {
        if !incoming.is(Keycode::Action) {
            return self.unexpected(incoming.keycode());
        }
        let action = match incoming.parse_action() {
            Ok(action) => action,
            Err(e) => return self.violate(Violation::Malformed(e)),
        };
        self.enter(ProtocolState::ClientAwaitsConfirm);

        let session_id = self.session_id;
        let broadcaster = Arc::clone(&self.broadcaster);
        let outcome = self.home.apply_action_then(&action, |applied| {
            broadcaster.broadcast(&Message::update(applied), session_id);
        });
        let accepted = match outcome {
            Ok(()) => {
                info!(session = session_id, %action, "action applied");
                true
            }
            Err(e) => {
                debug!(session = session_id, %action, "action rejected: {e}");
                false
            }
        };

        self.pending_confirm = Some(Message::confirm(action.sequence, accepted));
        self.process(Message::internal())
    }

    fn on_client_awaits_confirm(&mut self, incoming: Message) -> Option<Message> {
        if !incoming.is(Keycode::Internal) {
            return self.unexpected(incoming.keycode());
        }
        self.enter(ProtocolState::ServerAwaitsAction);
        self.pending_confirm.take()
    }
}

impl ProtocolDfa for ServerDfa {
    fn process(&mut self, incoming: Message) -> Option<Message> {
        if incoming.is(Keycode::Terminate) {
            self.reset();
            return Some(Message::terminate());
        }
        match self.state {
            ProtocolState::Idle => self.on_idle(incoming),
            ProtocolState::ClientAwaitsVersion => self.on_client_awaits_version(incoming),
            ProtocolState::ServerAwaitsVersion => self.on_server_awaits_version(incoming),
            ProtocolState::ClientAwaitsChallenge => self.on_client_awaits_challenge(incoming),
            ProtocolState::ServerAwaitsResponse => self.on_server_awaits_response(incoming),
            ProtocolState::ClientAwaitsInit => self.on_client_awaits_init(incoming),
            ProtocolState::ServerAwaitsAction => self.on_server_awaits_action(incoming),
            ProtocolState::ClientAwaitsConfirm => self.on_client_awaits_confirm(incoming),
        }
    }

    fn state(&self) -> ProtocolState {
        self.state
    }

    fn reject(&mut self, violation: Violation) -> Message {
        warn!(session = self.session_id, state = %self.state, "protocol violation: {violation}");
        self.reset();
        violation.reply()
    }
}

impl std::fmt::Debug for ServerDfa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDfa")
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
