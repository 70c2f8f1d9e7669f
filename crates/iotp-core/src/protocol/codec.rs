//! Hex line codec for IOTP messages.
//!
//! Wire format:
//! ```text
//! hex([keycode:1][payload:N]) '\n'
//! ```
//! One message per line.  Rendering the bytes as hexadecimal text means the
//! payload can never contain the line terminator, so framing is just "read
//! one line".  Decoding accepts upper- and lower-case digits and tolerates a
//! trailing `\r\n`.  Lines are bytes on the wire; a line that is not even
//! ASCII is simply invalid hex.

use thiserror::Error;

use crate::protocol::messages::{Keycode, Message};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line or byte string contained no keycode at all.
    #[error("empty message")]
    Empty,

    /// The line is not valid hexadecimal.
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    /// The keycode byte is not a recognized value.
    #[error("unknown keycode: 0x{0:02X}")]
    UnknownKeycode(u8),

    /// A local sentinel was handed to the codec.
    #[error("{0} is a local sentinel and cannot be sent")]
    LocalOnly(Keycode),

    /// The payload does not have the layout its keycode requires.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The peer sent more than the given number of bytes without a newline.
    #[error("line longer than {0} bytes")]
    LineTooLong(usize),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Serializes a [`Message`] into its raw wire bytes (keycode first).
///
/// # Errors
///
/// Returns [`ProtocolError::LocalOnly`] for `INTERNAL` and `WAIT_USER_INPUT`.
pub fn to_bytes(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let keycode = msg
        .keycode()
        .wire_byte()
        .ok_or(ProtocolError::LocalOnly(msg.keycode()))?;

    let mut buf = Vec::with_capacity(1 + msg.payload().len());
    buf.push(keycode);
    buf.extend_from_slice(msg.payload());
    Ok(buf)
}

/// Parses raw wire bytes into a [`Message`].
///
/// # Errors
///
/// Returns [`ProtocolError::Empty`] for an empty slice and
/// [`ProtocolError::UnknownKeycode`] if the first byte is not a keycode.
pub fn from_bytes(bytes: &[u8]) -> Result<Message, ProtocolError> {
    let (&first, payload) = bytes.split_first().ok_or(ProtocolError::Empty)?;
    let keycode = Keycode::try_from(first)?;
    Ok(Message::new(keycode, payload.to_vec()))
}

/// Encodes a [`Message`] as one newline-terminated hex line.
///
/// # Errors
///
/// Returns [`ProtocolError::LocalOnly`] for the local sentinels.
///
/// # Examples
///
/// ```rust
/// use iotp_core::protocol::{decode_line, encode_line, Message};
///
/// let line = encode_line(&Message::confirm(3, true)).unwrap();
/// assert_eq!(line, "070301\n");
/// assert_eq!(decode_line(&line).unwrap(), Message::confirm(3, true));
/// ```
pub fn encode_line(msg: &Message) -> Result<String, ProtocolError> {
    let mut line = hex::encode(to_bytes(msg)?);
    line.push('\n');
    Ok(line)
}

/// Decodes one hex line (with or without its terminator) into a [`Message`].
///
/// # Errors
///
/// Returns [`ProtocolError`] if the line is empty, not hexadecimal, or does
/// not start with a known keycode.
pub fn decode_line(line: impl AsRef<[u8]>) -> Result<Message, ProtocolError> {
    let mut trimmed = line.as_ref();
    while let [rest @ .., b'\r' | b'\n'] = trimmed {
        trimmed = rest;
    }
    if trimmed.is_empty() {
        return Err(ProtocolError::Empty);
    }
    let bytes = hex::decode(trimmed).map_err(|e| ProtocolError::InvalidHex(e.to_string()))?;
    from_bytes(&bytes)
}
