//! Error types for the MQTT communicator
//!
//! Non-success codes from the MQTT client collaborator are translated into
//! descriptive [`CommunicatorError`] values and surfaced synchronously to the
//! caller of the operation that triggered them.

use crate::config::ConfigError;
use crate::transport::ClientError;
use std::collections::TryReserveError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for communicator operations
#[derive(Debug, Error)]
pub enum CommunicatorError {
    #[error("Error connecting to MQTT broker: {0}")]
    ConnectionFailed(#[source] ClientError),

    #[error("Timeout while trying to connect to MQTT broker (after {timeout:?})")]
    ConnectTimeout { timeout: Duration },

    #[error("Timeout while waiting for message (after {timeout:?})")]
    ReceiveTimeout { timeout: Duration },

    #[error("Error sending message: {0}")]
    PublishFailed(#[source] ClientError),

    #[error("Error subscribing to {topic}: {source}")]
    SubscriptionFailed {
        topic: String,
        #[source]
        source: ClientError,
    },

    #[error("Failed to allocate {len} bytes for message on {topic}")]
    AllocationFailed {
        topic: String,
        len: usize,
        #[source]
        source: TryReserveError,
    },

    #[error("Error starting network loop: {0}")]
    LoopStartFailed(#[source] ClientError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
}

impl CommunicatorError {
    /// True for both the connect and the receive timeout
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            CommunicatorError::ConnectTimeout { .. } | CommunicatorError::ReceiveTimeout { .. }
        )
    }

    /// Create subscription error
    pub fn subscription_failed<S: Into<String>>(topic: S, source: ClientError) -> Self {
        Self::SubscriptionFailed {
            topic: topic.into(),
            source,
        }
    }
}

/// Result type for communicator operations
pub type CommunicatorResult<T> = Result<T, CommunicatorError>;
