//! The protocol state machine, in a client role and a server role.
//!
//! # How a connection progresses (for beginners)
//!
//! Both ends walk through the same sequence of states.  Each state names the
//! side that is currently waiting for something:
//!
//! ```text
//!  Idle
//!   │ PING (client → server)
//!   ▼
//!  ClientAwaitsVersion ── server VERSION ──► ServerAwaitsVersion
//!                                                │ client VERSION
//!                                                ▼
//!  ServerAwaitsResponse ◄── CHALLENGE ─── ClientAwaitsChallenge
//!   │ RESPONSE
//!   ▼
//!  ClientAwaitsInit ── INITIAL ──► ServerAwaitsAction ◄──────┐
//!                                    │ ACTION                 │ CONFIRM
//!                                    ▼                        │
//!                                  ClientAwaitsConfirm ───────┘
//! ```
//!
//! Some states exist only to produce a message.  When a role enters such a
//! state it immediately calls `process(INTERNAL)` on itself, so one call to
//! [`ProtocolDfa::process`] can walk through two states and return the
//! message the second one produced.
//!
//! Two rules apply in every state:
//!
//! - TERMINATE is echoed back straight away.
//! - Anything the current state does not expect resets the machine to
//!   `Idle` and yields an ERROR message for the peer.

pub mod client;
pub mod server;

use std::fmt;

use thiserror::Error;

use crate::devices::DeviceError;
use crate::protocol::codec::ProtocolError;
use crate::protocol::messages::{Keycode, Message};

pub use client::{ClientDfa, Credentials};
pub use server::ServerDfa;

/// Identifier the server assigns to each connection.
pub type SessionId = u64;

/// Connection state shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    Idle,
    ClientAwaitsVersion,
    ServerAwaitsVersion,
    ClientAwaitsChallenge,
    ServerAwaitsResponse,
    ClientAwaitsInit,
    ServerAwaitsAction,
    ClientAwaitsConfirm,
}

impl ProtocolState {
    pub const ALL: [ProtocolState; 8] = [
        ProtocolState::Idle,
        ProtocolState::ClientAwaitsVersion,
        ProtocolState::ServerAwaitsVersion,
        ProtocolState::ClientAwaitsChallenge,
        ProtocolState::ServerAwaitsResponse,
        ProtocolState::ClientAwaitsInit,
        ProtocolState::ServerAwaitsAction,
        ProtocolState::ClientAwaitsConfirm,
    ];
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolState::Idle => "IDLE",
            ProtocolState::ClientAwaitsVersion => "C_AWAITS_VERSION",
            ProtocolState::ServerAwaitsVersion => "S_AWAITS_VERSION",
            ProtocolState::ClientAwaitsChallenge => "C_AWAITS_CHALLENGE",
            ProtocolState::ServerAwaitsResponse => "S_AWAITS_RESPONSE",
            ProtocolState::ClientAwaitsInit => "C_AWAITS_INIT",
            ProtocolState::ServerAwaitsAction => "S_AWAITS_ACTION",
            ProtocolState::ClientAwaitsConfirm => "C_AWAITS_CONFIRM",
        };
        f.write_str(name)
    }
}

/// A message that is well formed but not acceptable where it arrived.
///
/// Every violation resets the machine to [`ProtocolState::Idle`] and is
/// answered with [`Violation::reply`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Violation {
    #[error("{keycode} is not valid in state {state}")]
    Unexpected {
        state: ProtocolState,
        keycode: Keycode,
    },

    #[error("PING must have an empty payload")]
    MalformedPing,

    #[error("peer speaks version {0:?}")]
    VersionMismatch(String),

    #[error("challenge response rejected")]
    AuthenticationFailed,

    #[error("malformed message: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("unusable home snapshot: {0}")]
    Snapshot(DeviceError),

    #[error("CONFIRM for #{got} while #{expected} is pending")]
    ConfirmMismatch { expected: u8, got: u8 },
}

impl Violation {
    /// The ERROR message sent to the peer for this violation.
    pub fn reply(&self) -> Message {
        match self {
            Violation::MalformedPing => Message::error_ping(),
            Violation::VersionMismatch(_) => Message::error_version(),
            Violation::AuthenticationFailed => Message::error_auth(),
            _ => Message::error_general(),
        }
    }
}

/// One side of the protocol for one connection.
pub trait ProtocolDfa: Send {
    /// Feeds one message and returns what should happen next: a message to
    /// write, the `WAIT_USER_INPUT` sentinel, or `None` when there is nothing
    /// to send.
    fn process(&mut self, incoming: Message) -> Option<Message>;

    /// The current state.
    fn state(&self) -> ProtocolState;

    /// Resets to `Idle` because of a failure detected outside the machine
    /// (for example, an undecodable line) and returns the ERROR reply.
    fn reject(&mut self, violation: Violation) -> Message;
}

/// Fan-out of UPDATE messages to every subscribed session except the one
/// that caused them.
///
/// A session subscribes in the same critical section that takes its INITIAL
/// snapshot, so it receives exactly the updates the snapshot does not
/// already contain.
#[cfg_attr(test, mockall::automock)]
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, update: &Message, origin: SessionId);

    fn subscribe(&self, session: SessionId);

    fn unsubscribe(&self, session: SessionId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_replies_use_role_specific_errors() {
        assert_eq!(Violation::MalformedPing.reply(), Message::error_ping());
        assert_eq!(
            Violation::VersionMismatch("IOTP 0002".into()).reply(),
            Message::error_version()
        );
        assert_eq!(
            Violation::AuthenticationFailed.reply(),
            Message::error_auth()
        );
        assert_eq!(
            Violation::Unexpected {
                state: ProtocolState::Idle,
                keycode: Keycode::Confirm
            }
            .reply(),
            Message::error_general()
        );
        assert_eq!(
            Violation::from(ProtocolError::Empty).reply(),
            Message::error_general()
        );
    }

    #[test]
    fn test_malformed_violation_can_be_cloned() {
        // Arrange
        let violation = Violation::Malformed(ProtocolError::InvalidHex("odd length".into()));

        // Act
        let copy = violation.clone();

        // Assert
        assert_eq!(copy, violation);
        assert_eq!(copy.reply(), Message::error_general());
    }

    #[test]
    fn test_state_display_names() {
        assert_eq!(ProtocolState::ServerAwaitsAction.to_string(), "S_AWAITS_ACTION");
        assert_eq!(ProtocolState::Idle.to_string(), "IDLE");
    }
}
