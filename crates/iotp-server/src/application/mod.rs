//! Application layer for the IOTP server.
//!
//! Contains the session registry, which is both the set of live connections
//! and the [`Broadcaster`](iotp_core::Broadcaster) the server DFAs use to
//! fan UPDATE messages out to every other client.

pub mod broadcast;

pub use broadcast::{SessionRegistration, SessionRegistry};
