//! Testing utilities and mock implementations
//!
//! Mocks for exercising the gateway and the inbound processor without an
//! MQTT broker.

pub mod mocks;

pub use mocks::*;
