//! The [`DeviceAction`] value carried by ACTION and UPDATE messages.

use std::fmt;

use crate::protocol::codec::ProtocolError;

/// A request to run one opcode on one device.
///
/// Fields are kept as raw wire bytes: an action naming a device type or
/// index that does not exist is still a well-formed message, and is refused
/// by the home rather than by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAction {
    pub sequence: u8,
    pub device_type: u8,
    pub device_index: u8,
    pub opcode: u8,
    pub params: Vec<u8>,
}

impl DeviceAction {
    pub fn new(
        sequence: u8,
        device_type: u8,
        device_index: u8,
        opcode: u8,
        params: Vec<u8>,
    ) -> Self {
        Self {
            sequence,
            device_type,
            device_index,
            opcode,
            params,
        }
    }

    /// `[device type][device index][opcode][params..]`, shared by ACTION
    /// (after the sequence byte) and UPDATE.
    pub(crate) fn target_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + self.params.len());
        buf.push(self.device_type);
        buf.push(self.device_index);
        buf.push(self.opcode);
        buf.extend_from_slice(&self.params);
        buf
    }

    pub(crate) fn from_target_bytes(sequence: u8, bytes: &[u8]) -> Result<Self, ProtocolError> {
        match bytes {
            [device_type, device_index, opcode, params @ ..] => Ok(Self::new(
                sequence,
                *device_type,
                *device_index,
                *opcode,
                params.to_vec(),
            )),
            _ => Err(ProtocolError::MalformedPayload(format!(
                "device action needs at least 3 bytes, got {}",
                bytes.len()
            ))),
        }
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} type={} device={} opcode={} params={:?}",
            self.sequence, self.device_type, self.device_index, self.opcode, self.params
        )
    }
}
