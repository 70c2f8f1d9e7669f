//! Infrastructure layer for the server application.
//!
//! Contains OS-facing adapters: the TCP accept loop and session loops,
//! file-system storage for configuration and credentials, and the stdin
//! shutdown command.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `iotp_core`, but MUST NOT be imported by the `application` layer.

pub mod console;
pub mod network;
pub mod storage;
