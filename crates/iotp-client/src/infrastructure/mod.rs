//! Infrastructure layer for the client: the network session, the terminal
//! front end that asks a person for actions, and the raw hex console.

pub mod network;
pub mod raw_console;
pub mod terminal;
