//! Testing utilities and mock implementations
//!
//! This module provides a mock MQTT client for testing the communicator
//! without requiring an MQTT broker.

pub mod mocks;

pub use mocks::*;
