//! All IOTP protocol keycodes and the [`Message`] value type.
//!
//! A message is a keycode plus a keycode-specific payload.  On the wire the
//! keycode is always the first byte:
//!
//! ```text
//! PING       [0]
//! VERSION    [1][utf-8 version string]
//! ERROR      [2][utf-8 reason]
//! CHALLENGE  [3][16 random bytes]
//! RESPONSE   [4][username][';'][response bytes]
//! INITIAL    [5][home snapshot]
//! ACTION     [6][seq][device type][device index][opcode][params..]
//! CONFIRM    [7][seq][accept 0/1]
//! UPDATE     [8][device type][device index][opcode][params..]
//! TERMINATE  [9]
//! ```
//!
//! Two further keycodes, `INTERNAL` and `WAIT_USER_INPUT`, only ever travel
//! between a state machine and the session that drives it.  They have no wire
//! byte and the codec refuses to encode them.

use std::fmt;

use crate::devices::DeviceAction;
use crate::protocol::codec::ProtocolError;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Version string exchanged during the handshake.
pub const PROTOCOL_VERSION: &str = "IOTP 0001";

/// Reason text for a general protocol violation.
pub const ERROR_GENERAL: &str = "General error";

/// Reason text for a malformed PING.
pub const ERROR_PING: &str = "Ping error";

/// Reason text for a version mismatch.
pub const ERROR_VERSION: &str = "Unsupported version";

/// Reason text for a rejected challenge response.
pub const ERROR_AUTH: &str = "Failed authentication";

/// Separator between the username and the response bytes in a RESPONSE.
pub const RESPONSE_SEPARATOR: u8 = b';';

// ── Keycodes ──────────────────────────────────────────────────────────────────

/// Identifies the type of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keycode {
    /// Local sentinel: a state machine asking itself for its next message.
    Internal,
    /// Local sentinel: the session must collect an action from its user.
    WaitUserInput,
    Ping,
    Version,
    Error,
    Challenge,
    Response,
    Initial,
    Action,
    Confirm,
    Update,
    Terminate,
}

impl Keycode {
    /// Every keycode, sentinels first, in wire-byte order afterwards.
    pub const ALL: [Keycode; 12] = [
        Keycode::Internal,
        Keycode::WaitUserInput,
        Keycode::Ping,
        Keycode::Version,
        Keycode::Error,
        Keycode::Challenge,
        Keycode::Response,
        Keycode::Initial,
        Keycode::Action,
        Keycode::Confirm,
        Keycode::Update,
        Keycode::Terminate,
    ];

    /// Returns the byte this keycode is written as, or `None` for the local
    /// sentinels.
    pub fn wire_byte(self) -> Option<u8> {
        match self {
            Keycode::Internal | Keycode::WaitUserInput => None,
            Keycode::Ping => Some(0),
            Keycode::Version => Some(1),
            Keycode::Error => Some(2),
            Keycode::Challenge => Some(3),
            Keycode::Response => Some(4),
            Keycode::Initial => Some(5),
            Keycode::Action => Some(6),
            Keycode::Confirm => Some(7),
            Keycode::Update => Some(8),
            Keycode::Terminate => Some(9),
        }
    }

    /// Returns `true` for `INTERNAL` and `WAIT_USER_INPUT`.
    pub fn is_local(self) -> bool {
        self.wire_byte().is_none()
    }
}

impl TryFrom<u8> for Keycode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Keycode::Ping),
            1 => Ok(Keycode::Version),
            2 => Ok(Keycode::Error),
            3 => Ok(Keycode::Challenge),
            4 => Ok(Keycode::Response),
            5 => Ok(Keycode::Initial),
            6 => Ok(Keycode::Action),
            7 => Ok(Keycode::Confirm),
            8 => Ok(Keycode::Update),
            9 => Ok(Keycode::Terminate),
            other => Err(ProtocolError::UnknownKeycode(other)),
        }
    }
}

impl fmt::Display for Keycode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Keycode::Internal => "INTERNAL",
            Keycode::WaitUserInput => "WAIT_USER_INPUT",
            Keycode::Ping => "PING",
            Keycode::Version => "VERSION",
            Keycode::Error => "ERROR",
            Keycode::Challenge => "CHALLENGE",
            Keycode::Response => "RESPONSE",
            Keycode::Initial => "INITIAL",
            Keycode::Action => "ACTION",
            Keycode::Confirm => "CONFIRM",
            Keycode::Update => "UPDATE",
            Keycode::Terminate => "TERMINATE",
        };
        f.write_str(name)
    }
}

// ── Message ───────────────────────────────────────────────────────────────────

/// An immutable protocol message: a keycode and its payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    keycode: Keycode,
    payload: Vec<u8>,
}

/// Decoded body of a CONFIRM message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub sequence: u8,
    pub accepted: bool,
}

impl Message {
    /// Creates a message from raw parts.
    pub fn new(keycode: Keycode, payload: Vec<u8>) -> Self {
        Self { keycode, payload }
    }

    /// Creates a message with an empty payload.
    pub fn empty(keycode: Keycode) -> Self {
        Self::new(keycode, Vec::new())
    }

    pub fn internal() -> Self {
        Self::empty(Keycode::Internal)
    }

    pub fn wait_user_input() -> Self {
        Self::empty(Keycode::WaitUserInput)
    }

    pub fn ping() -> Self {
        Self::empty(Keycode::Ping)
    }

    pub fn terminate() -> Self {
        Self::empty(Keycode::Terminate)
    }

    pub fn version(version: &str) -> Self {
        Self::new(Keycode::Version, version.as_bytes().to_vec())
    }

    pub fn error(reason: &str) -> Self {
        Self::new(Keycode::Error, reason.as_bytes().to_vec())
    }

    pub fn error_general() -> Self {
        Self::error(ERROR_GENERAL)
    }

    pub fn error_ping() -> Self {
        Self::error(ERROR_PING)
    }

    pub fn error_version() -> Self {
        Self::error(ERROR_VERSION)
    }

    pub fn error_auth() -> Self {
        Self::error(ERROR_AUTH)
    }

    pub fn challenge(challenge: &[u8]) -> Self {
        Self::new(Keycode::Challenge, challenge.to_vec())
    }

    /// Wraps an already formatted `username;response` body.
    pub fn response(body: Vec<u8>) -> Self {
        Self::new(Keycode::Response, body)
    }

    pub fn initial(snapshot: Vec<u8>) -> Self {
        Self::new(Keycode::Initial, snapshot)
    }

    /// Builds an ACTION carrying the action's sequence number.
    pub fn action(action: &DeviceAction) -> Self {
        let mut payload = Vec::with_capacity(4 + action.params.len());
        payload.push(action.sequence);
        payload.extend_from_slice(&action.target_bytes());
        Self::new(Keycode::Action, payload)
    }

    /// Builds an UPDATE: the ACTION layout without the sequence number.
    pub fn update(action: &DeviceAction) -> Self {
        Self::new(Keycode::Update, action.target_bytes())
    }

    pub fn confirm(sequence: u8, accepted: bool) -> Self {
        Self::new(Keycode::Confirm, vec![sequence, u8::from(accepted)])
    }

    pub fn keycode(&self) -> Keycode {
        self.keycode
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns `true` if this message carries the given keycode.
    pub fn is(&self, keycode: Keycode) -> bool {
        self.keycode == keycode
    }

    /// Interprets the payload as UTF-8 text (VERSION and ERROR bodies).
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Parses an ACTION payload into a [`DeviceAction`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if the message is not an
    /// ACTION or the payload is shorter than the fixed four-byte prefix.
    pub fn parse_action(&self) -> Result<DeviceAction, ProtocolError> {
        self.expect_keycode(Keycode::Action)?;
        match self.payload.split_first() {
            Some((&sequence, rest)) => DeviceAction::from_target_bytes(sequence, rest),
            None => Err(ProtocolError::MalformedPayload(
                "ACTION payload is empty".to_string(),
            )),
        }
    }

    /// Parses an UPDATE payload into a [`DeviceAction`] with sequence 0.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if the message is not an
    /// UPDATE or the payload is too short.
    pub fn parse_update(&self) -> Result<DeviceAction, ProtocolError> {
        self.expect_keycode(Keycode::Update)?;
        DeviceAction::from_target_bytes(0, &self.payload)
    }

    /// Parses a CONFIRM payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] unless the payload is
    /// exactly `[seq, 0|1]`.
    pub fn parse_confirm(&self) -> Result<Confirmation, ProtocolError> {
        self.expect_keycode(Keycode::Confirm)?;
        match self.payload.as_slice() {
            [sequence, flag @ (0 | 1)] => Ok(Confirmation {
                sequence: *sequence,
                accepted: *flag == 1,
            }),
            other => Err(ProtocolError::MalformedPayload(format!(
                "CONFIRM payload must be [seq, 0|1], got {other:?}"
            ))),
        }
    }

    fn expect_keycode(&self, keycode: Keycode) -> Result<(), ProtocolError> {
        if self.keycode == keycode {
            Ok(())
        } else {
            Err(ProtocolError::MalformedPayload(format!(
                "expected {keycode}, got {}",
                self.keycode
            )))
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.keycode {
            Keycode::Version | Keycode::Error => {
                write!(f, "{} \"{}\"", self.keycode, String::from_utf8_lossy(&self.payload))
            }
            _ if self.payload.is_empty() => write!(f, "{}", self.keycode),
            _ => write!(f, "{} {}", self.keycode, hex::encode(&self.payload)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_bytes_match_keycode_catalogue() {
        // Arrange
        let expected = [
            (Keycode::Ping, 0u8),
            (Keycode::Version, 1),
            (Keycode::Error, 2),
            (Keycode::Challenge, 3),
            (Keycode::Response, 4),
            (Keycode::Initial, 5),
            (Keycode::Action, 6),
            (Keycode::Confirm, 7),
            (Keycode::Update, 8),
            (Keycode::Terminate, 9),
        ];

        // Act / Assert
        for (keycode, byte) in expected {
            assert_eq!(keycode.wire_byte(), Some(byte), "{keycode}");
            assert_eq!(Keycode::try_from(byte), Ok(keycode));
        }
    }

    #[test]
    fn test_sentinels_have_no_wire_byte() {
        assert!(Keycode::Internal.is_local());
        assert!(Keycode::WaitUserInput.is_local());
        assert!(!Keycode::Terminate.is_local());
    }

    #[test]
    fn test_unknown_keycode_byte_is_rejected() {
        assert_eq!(
            Keycode::try_from(10),
            Err(ProtocolError::UnknownKeycode(10))
        );
    }

    #[test]
    fn test_confirm_payload_layout() {
        // Arrange / Act
        let msg = Message::confirm(7, true);

        // Assert
        assert_eq!(msg.payload(), &[7, 1]);
        assert_eq!(
            msg.parse_confirm(),
            Ok(Confirmation {
                sequence: 7,
                accepted: true
            })
        );
    }

    #[test]
    fn test_confirm_with_invalid_flag_is_malformed() {
        let msg = Message::new(Keycode::Confirm, vec![1, 2]);
        assert!(matches!(
            msg.parse_confirm(),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_update_is_action_without_sequence() {
        // Arrange
        let action = DeviceAction::new(12, 3, 1, 2, vec![40]);

        // Act
        let action_msg = Message::action(&action);
        let update_msg = Message::update(&action);

        // Assert
        assert_eq!(action_msg.payload(), &[12, 3, 1, 2, 40]);
        assert_eq!(update_msg.payload(), &action_msg.payload()[1..]);
    }

    #[test]
    fn test_parse_update_uses_sequence_zero() {
        // Arrange
        let action = DeviceAction::new(99, 0, 2, 0, Vec::new());

        // Act
        let parsed = Message::update(&action).parse_update().unwrap();

        // Assert
        assert_eq!(parsed.sequence, 0);
        assert_eq!(parsed.device_index, 2);
    }

    #[test]
    fn test_parse_action_rejects_short_payload() {
        let msg = Message::new(Keycode::Action, vec![0, 1, 2]);
        assert!(msg.parse_action().is_err());
    }

    #[test]
    fn test_parse_action_rejects_wrong_keycode() {
        let msg = Message::new(Keycode::Update, vec![0, 1, 2, 3]);
        assert!(msg.parse_action().is_err());
    }

    #[test]
    fn test_text_reads_version_payload() {
        assert_eq!(Message::version(PROTOCOL_VERSION).text(), Some("IOTP 0001"));
    }
}
