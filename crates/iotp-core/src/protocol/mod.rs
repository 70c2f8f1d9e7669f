//! Protocol module containing keycodes, message values, the hex line codec
//! and the bounded line reader.

pub mod codec;
pub mod framing;
pub mod messages;
pub mod sequence;

pub use codec::{decode_line, encode_line, from_bytes, to_bytes, ProtocolError};
pub use framing::{Frame, LineReader, MAX_LINE_LEN};
pub use messages::*;
pub use sequence::SequenceCounter;
