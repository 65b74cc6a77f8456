//! Connection synchronizer
//!
//! Turns the client's asynchronous connect acknowledgment into a blocking
//! connect-or-fail call. A successful `connect_async` only means the request
//! was accepted, not that the transport handshake will ever finish, so the
//! waiting side polls with a bounded interval and re-issues a reconnect each
//! time the interval passes without a connect notification.

use crate::error::{CommunicatorError, CommunicatorResult};
use crate::transport::BrokerClient;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Interval between reconnect attempts while waiting for a connection
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Where and how to connect
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub keepalive: Duration,
}

impl ConnectTarget {
    pub fn new(host: impl Into<String>, port: u16, keepalive: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            keepalive,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// What a successful `open` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenReport {
    pub connect_calls: u32,
    pub reconnect_calls: u32,
    pub elapsed: Duration,
}

/// Connected flag plus the condition variable its waiters sleep on
#[derive(Debug)]
pub struct ConnectionSynchronizer {
    connected: Mutex<bool>,
    changed: Condvar,
    poll_interval: Duration,
}

impl Default for ConnectionSynchronizer {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ConnectionSynchronizer {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            connected: Mutex::new(false),
            changed: Condvar::new(),
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.connected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        *self.lock()
    }

    /// Record a successful connect and wake one waiter
    pub fn notify_connected(&self) {
        {
            let mut connected = self.lock();
            *connected = true;
        }
        self.changed.notify_one();
    }

    /// Record that the connection is gone, whatever the cause
    pub fn notify_disconnected(&self) {
        let mut connected = self.lock();
        *connected = false;
    }

    /// Connect and block until the client reports the connection
    ///
    /// Without a `timeout` the reconnect loop runs until a connection is
    /// observed or the client synchronously rejects a request. The same holds
    /// for a timeout too large to form a deadline.
    pub fn open<C: BrokerClient + ?Sized>(
        &self,
        client: &C,
        target: &ConnectTarget,
        timeout: Option<Duration>,
    ) -> CommunicatorResult<OpenReport> {
        let started = Instant::now();
        let deadline = timeout.and_then(|t| started.checked_add(t));
        let mut report = OpenReport {
            connect_calls: 1,
            reconnect_calls: 0,
            elapsed: Duration::ZERO,
        };

        info!(endpoint = %target.endpoint(), "Connecting to MQTT broker");
        client
            .connect_async(&target.host, target.port, target.keepalive)
            .map_err(CommunicatorError::ConnectionFailed)?;

        loop {
            let wait = match deadline {
                Some(deadline) => self
                    .poll_interval
                    .min(deadline.saturating_duration_since(Instant::now())),
                None => self.poll_interval,
            };

            if self.wait_connected(wait) {
                report.elapsed = started.elapsed();
                debug!(
                    reconnects = report.reconnect_calls,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Connection confirmed"
                );
                return Ok(report);
            }

            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    return Err(CommunicatorError::ConnectTimeout { timeout });
                }
            }

            debug!(endpoint = %target.endpoint(), "No connection yet, reconnecting");
            report.reconnect_calls += 1;
            client
                .reconnect_async()
                .map_err(CommunicatorError::ConnectionFailed)?;
        }
    }

    /// Wait up to `wait` for the connected flag; true when it is set
    fn wait_connected(&self, wait: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, wait, |connected| !*connected)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}
