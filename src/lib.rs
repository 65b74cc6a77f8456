//! MQTT Communicator
//!
//! A blocking, thread-based MQTT endpoint layered over an asynchronous MQTT
//! client library.
//!
//! # Overview
//!
//! The client library reports connection progress and inbound messages from
//! its own network thread. This crate turns that into two blocking primitives:
//! - a connect-or-fail constructor that waits for the broker's acknowledgment,
//!   re-issuing reconnects at a fixed poll interval
//! - a FIFO hand-off queue that consumer threads drain with `get_message`
//!
//! Sending is fire-and-forget at QoS 2. The library itself sits behind the
//! [`transport::BrokerClient`] trait; [`transport::mqtt::RumqttcClient`] is the
//! production implementation and [`testing::MockBrokerClient`] a scripted one.
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_communicator::testing::MockBrokerClient;
//! use mqtt_communicator::{CommunicatorOptions, MqttCommunicator};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let client = Arc::new(MockBrokerClient::new());
//! let options = CommunicatorOptions::new("localhost", 1883, "node/in", "node/out")
//!     .with_timeout(Duration::from_secs(5));
//! let communicator = MqttCommunicator::connect(client.clone(), options).unwrap();
//!
//! communicator.send("ready").unwrap();
//!
//! client.deliver("node/in", b"ping");
//! let message = communicator.get_message();
//! assert_eq!(message.payload_str(), "ping");
//! ```

pub mod communicator;
pub mod config;
pub mod error;
pub mod observability;
pub mod testing;
pub mod transport;

pub use communicator::{CommunicatorOptions, Message, MqttCommunicator};
pub use config::CommunicatorConfig;
pub use error::{CommunicatorError, CommunicatorResult};
pub use transport::mqtt::RumqttcClient;
pub use transport::{BrokerClient, ClientCallbacks, ClientError};
