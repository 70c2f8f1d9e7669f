//! Client role of the protocol state machine.
//!
//! The client starts the conversation itself: the session feeds it INTERNAL
//! and it answers with PING.  After authenticating it keeps a local mirror of
//! the home built from the INITIAL snapshot, forwards locally chosen ACTIONs,
//! and keeps the mirror current from CONFIRMs and from the UPDATEs other
//! clients cause.

use tracing::{info, trace, warn};

use crate::auth;
use crate::devices::{DeviceAction, Home};
use crate::dfa::{ProtocolDfa, ProtocolState, Violation};
use crate::protocol::messages::{Keycode, Message};

/// Login used to answer the server's challenge.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Client-side state machine for one connection.
#[derive(Debug)]
pub struct ClientDfa {
    state: ProtocolState,
    version: String,
    credentials: Credentials,
    home: Option<Home>,
    pending_response: Option<Vec<u8>>,
    pending_action: Option<DeviceAction>,
}

impl ClientDfa {
    pub fn new(version: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            state: ProtocolState::Idle,
            version: version.into(),
            credentials,
            home: None,
            pending_response: None,
            pending_action: None,
        }
    }

    /// The local mirror of the home, available once INITIAL has arrived.
    pub fn home(&self) -> Option<&Home> {
        self.home.as_ref()
    }

    /// The action sent to the server and not yet confirmed.
    pub fn pending_action(&self) -> Option<&DeviceAction> {
        self.pending_action.as_ref()
    }

    fn enter(&mut self, next: ProtocolState) {
        trace!(from = %self.state, to = %next, "client transition");
        self.state = next;
    }

    fn violate(&mut self, violation: Violation) -> Option<Message> {
        Some(self.reject(violation))
    }

    fn unexpected(&mut self, keycode: Keycode) -> Option<Message> {
        let state = self.state;
        self.violate(Violation::Unexpected { state, keycode })
    }

    /// Applies an UPDATE to the local mirror.  Updates never move the
    /// machine; a mirror that disagrees with the server is only logged.
    fn apply_update(&mut self, incoming: &Message) -> Result<(), Violation> {
        let action = incoming.parse_update()?;
        if let Some(home) = self.home.as_mut() {
            match home.apply_action(&action) {
                Ok(()) => info!(%action, "home updated by another client"),
                Err(e) => warn!(%action, "could not mirror update: {e}"),
            }
        }
        Ok(())
    }

    // ── Per-state handlers ────────────────────────────────────────────────────

    fn on_idle(&mut self, incoming: Message) -> Option<Message> {
        if !incoming.is(Keycode::Internal) {
            return self.unexpected(incoming.keycode());
        }
        self.enter(ProtocolState::ClientAwaitsVersion);
        Some(Message::ping())
    }

    fn on_client_awaits_version(&mut self, incoming: Message) -> Option<Message> {
        if !incoming.is(Keycode::Version) {
            return self.unexpected(incoming.keycode());
        }
        if incoming.text() != Some(self.version.as_str()) {
            let offered = String::from_utf8_lossy(incoming.payload()).into_owned();
            return self.violate(Violation::VersionMismatch(offered));
        }
        self.enter(ProtocolState::ServerAwaitsVersion);
        self.process(Message::internal())
    }

    fn on_server_awaits_version(&mut self, incoming: Message) -> Option<Message> {
        if !incoming.is(Keycode::Internal) {
            return self.unexpected(incoming.keycode());
        }
        self.enter(ProtocolState::ClientAwaitsChallenge);
        Some(Message::version(&self.version))
    }

    fn on_client_awaits_challenge(&mut self, incoming: Message) -> Option<Message> {
        if !incoming.is(Keycode::Challenge) {
            return self.unexpected(incoming.keycode());
        }
        self.pending_response = Some(auth::build_user_response(
            &self.credentials.username,
            &self.credentials.password,
            incoming.payload(),
        ));
        self.enter(ProtocolState::ServerAwaitsResponse);
        self.process(Message::internal())
    }

    fn on_server_awaits_response(&mut self, incoming: Message) -> Option<Message> {
        if !incoming.is(Keycode::Internal) {
            return self.unexpected(incoming.keycode());
        }
        let Some(body) = self.pending_response.take() else {
            return self.unexpected(incoming.keycode());
        };
        self.enter(ProtocolState::ClientAwaitsInit);
        Some(Message::response(body))
    }

    fn on_client_awaits_init(&mut self, incoming: Message) -> Option<Message> {
        if !incoming.is(Keycode::Initial) {
            return self.unexpected(incoming.keycode());
        }
        match Home::from_snapshot_bytes(incoming.payload()) {
            Ok(home) => {
                info!(devices = home.device_count(), "received home snapshot");
                self.home = Some(home);
            }
            Err(e) => return self.violate(Violation::Snapshot(e)),
        }
        self.enter(ProtocolState::ServerAwaitsAction);
        self.process(Message::internal())
    }

    fn on_server_awaits_action(&mut self, incoming: Message) -> Option<Message> {
        match incoming.keycode() {
            Keycode::Internal => Some(Message::wait_user_input()),
            Keycode::Update => match self.apply_update(&incoming) {
                Ok(()) => Some(Message::wait_user_input()),
                Err(v) => self.violate(v),
            },
            Keycode::Action => {
                let action = match incoming.parse_action() {
                    Ok(action) => action,
                    Err(e) => return self.violate(Violation::Malformed(e)),
                };
                self.pending_action = Some(action);
                self.enter(ProtocolState::ClientAwaitsConfirm);
                Some(incoming)
            }
            other => self.unexpected(other),
        }
    }

    fn on_client_awaits_confirm(&mut self, incoming: Message) -> Option<Message> {
        match incoming.keycode() {
            Keycode::Update => match self.apply_update(&incoming) {
                Ok(()) => None,
                Err(v) => self.violate(v),
            },
            Keycode::Confirm => {
                let confirmation = match incoming.parse_confirm() {
                    Ok(c) => c,
                    Err(e) => return self.violate(Violation::Malformed(e)),
                };
                let Some(action) = self.pending_action.take() else {
                    return self.unexpected(Keycode::Confirm);
                };
                if confirmation.sequence != action.sequence {
                    return self.violate(Violation::ConfirmMismatch {
                        expected: action.sequence,
                        got: confirmation.sequence,
                    });
                }
                if confirmation.accepted {
                    if let Some(home) = self.home.as_mut() {
                        if let Err(e) = home.apply_action(&action) {
                            warn!(%action, "confirmed action does not apply locally: {e}");
                        }
                    }
                    info!(%action, "action confirmed");
                } else {
                    info!(%action, "action denied");
                }
                self.enter(ProtocolState::ServerAwaitsAction);
                self.process(Message::internal())
            }
            other => self.unexpected(other),
        }
    }
}

impl ProtocolDfa for ClientDfa {
    fn process(&mut self, incoming: Message) -> Option<Message> {
        if incoming.is(Keycode::Terminate) {
            self.enter(ProtocolState::Idle);
            return Some(Message::terminate());
        }
        if incoming.is(Keycode::Error) {
            // The server already reset its side; mirror that and stay quiet.
            warn!(state = %self.state, "server reported: {}", String::from_utf8_lossy(incoming.payload()));
            self.pending_response = None;
            self.pending_action = None;
            self.enter(ProtocolState::Idle);
            return None;
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
        warn!(state = %self.state, "protocol violation: {violation}");
        self.pending_response = None;
        self.pending_action = None;
        self.enter(ProtocolState::Idle);
        violation.reply()
    }
}
