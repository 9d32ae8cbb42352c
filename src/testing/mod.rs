//! Testing utilities and mock implementations
//!
//! Lets the live client be exercised without an MQTT broker.

pub mod mocks;

pub use mocks::*;
