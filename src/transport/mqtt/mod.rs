//! rumqttc implementation of the broker client boundary
//!
//! The module is split into three focused sub-modules:
//!
//! - [`connection`] - Pure connection configuration and backoff
//! - [`message_handler`] - Pure routing of event-loop output
//! - [`client`] - The network thread and the [`BrokerClient`](crate::transport::BrokerClient) impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_communicator::transport::mqtt::RumqttcClient;
//! use mqtt_communicator::{CommunicatorOptions, MqttCommunicator};
//! use std::sync::Arc;
//!
//! let client = Arc::new(RumqttcClient::new("sensor-node"));
//! let options = CommunicatorOptions::new("localhost", 1883, "sensors/in", "sensors/out");
//! let communicator = MqttCommunicator::connect(client, options)?;
//! communicator.send("hello")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::RumqttcClient;
pub use connection::{configure_mqtt_options, ReconnectConfig};
pub use message_handler::{ErrorRoute, EventRoute, MessageHandler};
