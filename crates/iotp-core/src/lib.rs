//! # iotp-core
//!
//! Shared library for the IoT Home Control Protocol (IOTP) containing the
//! wire codec, the per-connection protocol state machines, the
//! challenge-response authentication scheme, and the device model.
//!
//! This crate is used by both the server and client applications.
//! It has no dependencies on sockets or terminals.  The only async piece is
//! the line reader, which works over any Tokio buffered reader.
//!
//! # Architecture overview (for beginners)
//!
//! IOTP lets remote clients log in to a server that owns a "home": a small
//! collection of controllable devices (lights, blinds, thermostats, TVs and
//! smart locks).  A client receives a snapshot of the home, sends actions
//! such as "turn on the kitchen light", and is told about changes made by
//! every other connected client.
//!
//! This crate (`iotp-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the network.  A message is a
//!   keycode byte followed by a payload; the whole thing is rendered as one
//!   line of hexadecimal text, read back with a length-capped line reader.
//!
//! - **`auth`** – Random challenges, the keyed response a client proves its
//!   password with, and the server-side verification.
//!
//! - **`dfa`** – The deterministic finite automaton that drives each
//!   connection, in a client role and a server role.
//!
//! - **`devices`** – The closed set of device kinds, device actions, the
//!   `Home` registry with its snapshot format, and a seeded demo generator.

pub mod auth;
pub mod devices;
pub mod dfa;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `iotp_core::Message` instead of `iotp_core::protocol::messages::Message`.
pub use auth::{Authenticator, CredentialStore, StaticCredentials};
pub use devices::{DeviceAction, DeviceError, DeviceType, Home, SharedHome};
pub use dfa::{Broadcaster, ClientDfa, ProtocolDfa, ProtocolState, ServerDfa};
pub use protocol::codec::{decode_line, encode_line, ProtocolError};
pub use protocol::messages::{Keycode, Message, PROTOCOL_VERSION};
