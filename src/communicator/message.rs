//! Owned inbound message
//!
//! The client library only lends its buffer for the duration of the
//! `on_message` callback, so every message is copied into storage owned by
//! the hand-off queue before the callback returns.

use crate::error::{CommunicatorError, CommunicatorResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::borrow::Cow;

/// A received message: originating topic plus an opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: String,
    payload: Bytes,
    received_at: DateTime<Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Copy a borrowed payload into an owned message
    ///
    /// Fails instead of aborting when the payload buffer cannot be allocated.
    pub fn copy_from(topic: &str, payload: &[u8]) -> CommunicatorResult<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(payload.len())
            .map_err(|source| CommunicatorError::AllocationFailed {
                topic: topic.to_string(),
                len: payload.len(),
                source,
            })?;
        buf.extend_from_slice(payload);

        Ok(Self::new(topic, buf))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload decoded as UTF-8, with invalid sequences replaced
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Time the network thread handed the message over
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
