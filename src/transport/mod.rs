//! Boundary to the external MQTT client library
//!
//! The communicator never speaks MQTT itself. It drives a [`BrokerClient`]
//! (connect, subscribe, publish) and receives the client's network-thread
//! notifications through a [`ClientCallbacks`] implementation that is handed
//! to the client when its loop is started.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

pub use rumqttc::QoS;

/// CONNACK code reported when the broker accepted the connection
pub const CONNACK_ACCEPTED: u8 = 0;

/// Disconnect code for a disconnect requested by this side
pub const DISCONNECT_REQUESTED: u8 = 0;

/// Disconnect code for a lost connection (network error, broker gone)
pub const DISCONNECT_UNEXPECTED: u8 = 1;

/// Non-success return of a client library call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("network loop is not running")]
    LoopNotRunning,
    #[error("network loop is already running")]
    LoopAlreadyRunning,
    #[error("no connection has been requested yet")]
    NotConfigured,
    #[error("no connection to broker")]
    NoConnection,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ClientError {
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn rejected<S: Into<String>>(message: S) -> Self {
        Self::Rejected(message.into())
    }
}

/// Notifications delivered by the client library on its network thread
///
/// Implementations must not block for long: every callback runs on the only
/// thread that performs socket I/O.
pub trait ClientCallbacks: Send + Sync {
    /// Connect attempt finished; `code` is a CONNACK code, 0 on success
    fn on_connect(&self, code: u8);

    /// Connection ended; 0 when requested, non-zero when unexpected
    fn on_disconnect(&self, code: u8);

    /// Message arrived; `payload` is only borrowed for the duration of the call
    fn on_message(&self, topic: &str, payload: &[u8]);
}

/// Operations the communicator needs from an MQTT client library
///
/// Every call is a request that returns immediately; completion of connects
/// is reported later through [`ClientCallbacks::on_connect`].
pub trait BrokerClient: Send + Sync {
    /// Start the background network thread and register the callbacks
    fn start_loop(&self, callbacks: Arc<dyn ClientCallbacks>) -> Result<(), ClientError>;

    /// Stop the background network thread; no callback fires after this returns
    fn stop_loop(&self) -> Result<(), ClientError>;

    /// Request a connection without waiting for the handshake
    fn connect_async(&self, host: &str, port: u16, keepalive: Duration)
        -> Result<(), ClientError>;

    /// Re-issue the last connection request
    fn reconnect_async(&self) -> Result<(), ClientError>;

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ClientError>;

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool)
        -> Result<(), ClientError>;

    /// Request a graceful disconnect
    fn disconnect(&self) -> Result<(), ClientError>;
}

/// Human-readable reason for a CONNACK code
pub fn connack_string(code: u8) -> &'static str {
    match code {
        0 => "Connection Accepted.",
        1 => "Connection Refused: unacceptable protocol version.",
        2 => "Connection Refused: identifier rejected.",
        3 => "Connection Refused: broker unavailable.",
        4 => "Connection Refused: bad user name or password.",
        5 => "Connection Refused: not authorised.",
        _ => "Connection Refused: unknown reason.",
    }
}
