//! Application layer for the client: choosing what to do next.
//!
//! Whenever the client's DFA reaches "waiting for user input", the session
//! asks an [`ActionSource`] for one [`ActionRequest`].  The source gets its
//! own copy of the home so it can offer only devices that exist, and a
//! cancellation flag the session sets when the request is no longer wanted
//! (for example, because an UPDATE changed the home mid-prompt).
//!
//! # Implementations
//!
//! - [`StdinActionPrompt`](crate::infrastructure::terminal::StdinActionPrompt)
//!   walks a person through device type, device, operation and arguments.
//! - [`ScriptedActions`] replays a fixed list, for tests and demos.

pub mod prompt;
pub mod scripted;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use iotp_core::{DeviceAction, DeviceType, Home};

pub use scripted::ScriptedActions;

/// Set by the session when an in-flight request should be abandoned.
pub type CancelFlag = Arc<AtomicBool>;

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRequest {
    /// Apply an operation to one device.
    Act {
        device_type: DeviceType,
        device_index: u8,
        opcode: u8,
        params: Vec<u8>,
    },
    /// End the session.
    Terminate,
}

impl ActionRequest {
    pub fn act(device_type: DeviceType, device_index: u8, opcode: u8, params: Vec<u8>) -> Self {
        ActionRequest::Act {
            device_type,
            device_index,
            opcode,
            params,
        }
    }

    /// Stamps the request with a sequence number.  `Terminate` has no action
    /// form and yields `None`.
    pub fn into_action(self, sequence: u8) -> Option<DeviceAction> {
        match self {
            ActionRequest::Act {
                device_type,
                device_index,
                opcode,
                params,
            } => Some(DeviceAction::new(
                sequence,
                device_type.code(),
                device_index,
                opcode,
                params,
            )),
            ActionRequest::Terminate => None,
        }
    }
}

/// Supplier of the next action while the client waits for input.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionSource: Send + Sync {
    /// Collects one request against `home`.
    ///
    /// Returns `None` when input is exhausted or `cancel` was set.  The
    /// session treats `None` from a request it still wants as a request to
    /// terminate.
    async fn next_action(&self, home: Home, cancel: CancelFlag) -> Option<ActionRequest>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_action_carries_every_field() {
        // Arrange
        let request = ActionRequest::act(DeviceType::Tv, 2, 3, vec![40]);

        // Act
        let action = request.into_action(9).unwrap();

        // Assert
        assert_eq!(action, DeviceAction::new(9, DeviceType::Tv.code(), 2, 3, vec![40]));
    }

    #[test]
    fn test_terminate_has_no_action_form() {
        assert_eq!(ActionRequest::Terminate.into_action(0), None);
    }
}
