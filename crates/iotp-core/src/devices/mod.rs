//! Device model: kinds, actions, the home registry and the demo generator.

pub mod action;
pub mod device;
pub mod generator;
pub mod home;

pub use action::DeviceAction;
pub use device::{Device, DeviceError, DeviceKind, DeviceType, Effect, Operation};
pub use generator::HomeGenerator;
pub use home::{Home, SharedHome};
