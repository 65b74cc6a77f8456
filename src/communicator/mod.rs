//! Blocking communicator facade
//!
//! [`MqttCommunicator`] owns a [`BrokerClient`], the connection synchronizer
//! and the hand-off queue. Construction blocks until the broker acknowledges
//! the connection and the default subscription has been requested. After that,
//! any thread may `send` and any thread may block in `get_message` while the
//! client's network thread feeds the queue.

pub mod message;
pub mod queue;
pub mod sync;

pub use message::Message;
pub use queue::MessageQueue;
pub use sync::{ConnectTarget, ConnectionSynchronizer, OpenReport, DEFAULT_POLL_INTERVAL};

use crate::config::{CommunicatorConfig, ConfigError};
use crate::error::{CommunicatorError, CommunicatorResult};
use crate::mqtt_span;
use crate::observability::{CommunicatorStats, StatsSnapshot};
use crate::transport::mqtt::RumqttcClient;
use crate::transport::{
    connack_string, BrokerClient, ClientCallbacks, QoS, CONNACK_ACCEPTED, DISCONNECT_REQUESTED,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Keepalive used when none is configured
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(60);

/// Everything needed to bring a communicator up
#[derive(Debug, Clone, PartialEq)]
pub struct CommunicatorOptions {
    pub host: String,
    pub port: u16,
    pub keepalive: Duration,
    pub subscribe_topic: String,
    pub publish_topic: String,
    /// Give up connecting after this long; `None` retries forever
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl CommunicatorOptions {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        subscribe_topic: impl Into<String>,
        publish_topic: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            keepalive: DEFAULT_KEEPALIVE,
            subscribe_topic: subscribe_topic.into(),
            publish_topic: publish_topic.into(),
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn from_config(config: &CommunicatorConfig) -> Self {
        Self {
            host: config.mqtt.host.clone(),
            port: config.mqtt.port,
            keepalive: config.keepalive(),
            subscribe_topic: config.communicator.subscribe_topic.clone(),
            publish_topic: config.communicator.publish_topic.clone(),
            timeout: config.connect_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn target(&self) -> ConnectTarget {
        ConnectTarget::new(self.host.clone(), self.port, self.keepalive)
    }
}

/// Callbacks registered with the client; run on its network thread
struct CommunicatorCallbacks {
    endpoint: String,
    synchronizer: Arc<ConnectionSynchronizer>,
    queue: Arc<MessageQueue>,
    stats: Arc<CommunicatorStats>,
    copy_message: fn(&str, &[u8]) -> CommunicatorResult<Message>,
}

impl ClientCallbacks for CommunicatorCallbacks {
    fn on_connect(&self, code: u8) {
        if code == CONNACK_ACCEPTED {
            info!("Connection established to {}", self.endpoint);
            self.stats.connection_established();
            self.synchronizer.notify_connected();
        } else {
            warn!(
                code,
                "Connection to {} refused: {}",
                self.endpoint,
                connack_string(code)
            );
            self.stats.connection_refused();
        }
    }

    fn on_disconnect(&self, code: u8) {
        let unexpected = code != DISCONNECT_REQUESTED;
        if unexpected {
            warn!(code, "Unexpected disconnect from {}", self.endpoint);
        } else {
            info!("Disconnected from {}", self.endpoint);
        }
        self.stats.connection_lost(unexpected);
        self.synchronizer.notify_disconnected();
    }

    fn on_message(&self, topic: &str, payload: &[u8]) {
        match (self.copy_message)(topic, payload) {
            Ok(message) => {
                debug!(topic, bytes = payload.len(), "Message received");
                self.queue.enqueue(message);
                self.stats.message_received();
            }
            Err(e) => {
                error!("Dropping message: {}", e);
                self.stats.message_dropped();
            }
        }
    }
}

/// Connected MQTT endpoint with blocking receive
///
/// `Send + Sync` whenever the client is, so consumers can share it through an
/// `Arc`. Dropping it disconnects and joins the client's network thread.
pub struct MqttCommunicator<C: BrokerClient + ?Sized = RumqttcClient> {
    client: Arc<C>,
    synchronizer: Arc<ConnectionSynchronizer>,
    queue: Arc<MessageQueue>,
    stats: Arc<CommunicatorStats>,
    target: ConnectTarget,
    subscribe_topic: String,
    publish_topic: String,
    closed: AtomicBool,
}

impl MqttCommunicator<RumqttcClient> {
    /// Build the rumqttc client from configuration and connect
    pub fn from_config(config: &CommunicatorConfig) -> CommunicatorResult<Self> {
        config.validate()?;
        let client = Arc::new(RumqttcClient::from_config(config)?);
        Self::connect(client, CommunicatorOptions::from_config(config))
    }
}

impl<C: BrokerClient + ?Sized> MqttCommunicator<C> {
    /// Start the client's loop, block until connected, then subscribe
    ///
    /// On failure the network thread is stopped before returning. A zero poll
    /// interval is rejected before the loop starts.
    pub fn connect(client: Arc<C>, options: CommunicatorOptions) -> CommunicatorResult<Self> {
        if options.poll_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            )
            .into());
        }

        let target = options.target();
        let span = mqtt_span!(operation = "connect", endpoint = %target.endpoint());
        let _guard = span.enter();

        let synchronizer = Arc::new(ConnectionSynchronizer::new(options.poll_interval));
        let queue = Arc::new(MessageQueue::new());
        let stats = Arc::new(CommunicatorStats::new());

        let callbacks = Arc::new(CommunicatorCallbacks {
            endpoint: target.endpoint(),
            synchronizer: Arc::clone(&synchronizer),
            queue: Arc::clone(&queue),
            stats: Arc::clone(&stats),
            copy_message: Message::copy_from,
        });
        client
            .start_loop(callbacks)
            .map_err(CommunicatorError::LoopStartFailed)?;

        stats.connect_requested();
        let report = match synchronizer.open(client.as_ref(), &target, options.timeout) {
            Ok(report) => report,
            Err(e) => {
                if let Err(stop_err) = client.stop_loop() {
                    warn!("Failed to stop network loop after failed connect: {}", stop_err);
                }
                return Err(e);
            }
        };
        stats.reconnects_requested(report.reconnect_calls);

        let communicator = Self {
            client,
            synchronizer,
            queue,
            stats,
            target,
            subscribe_topic: options.subscribe_topic,
            publish_topic: options.publish_topic,
            closed: AtomicBool::new(false),
        };

        // A failed subscribe drops the communicator, which tears the connection down
        let topic = communicator.subscribe_topic.clone();
        communicator.subscribe(&topic)?;

        Ok(communicator)
    }

    /// Request an additional subscription at QoS 2
    pub fn subscribe(&self, topic: &str) -> CommunicatorResult<()> {
        self.client
            .subscribe(topic, QoS::ExactlyOnce)
            .map_err(|e| CommunicatorError::subscription_failed(topic, e))?;
        info!("Subscribed to {}", topic);
        Ok(())
    }

    /// Publish to the default publish topic
    pub fn send(&self, payload: impl AsRef<[u8]>) -> CommunicatorResult<()> {
        self.send_to(payload, &self.publish_topic)
    }

    /// Publish to `topic` at QoS 2, not retained
    ///
    /// Fire and forget: success only means the client accepted the request.
    pub fn send_to(&self, payload: impl AsRef<[u8]>, topic: &str) -> CommunicatorResult<()> {
        let payload = payload.as_ref();
        match self
            .client
            .publish(topic, payload, QoS::ExactlyOnce, false)
        {
            Ok(()) => {
                debug!(topic, bytes = payload.len(), "Message published");
                self.stats.message_published();
                Ok(())
            }
            Err(e) => {
                warn!("Publish to {} failed: {}", topic, e);
                self.stats.publish_failed();
                Err(CommunicatorError::PublishFailed(e))
            }
        }
    }

    /// Block until a message is available and take it
    pub fn get_message(&self) -> Message {
        let message = self.queue.dequeue_blocking();
        self.stats.message_delivered();
        message
    }

    /// Take the next message, waiting at most `timeout`
    pub fn get_message_timeout(&self, timeout: Duration) -> CommunicatorResult<Message> {
        let message = self.queue.dequeue_timeout(timeout)?;
        self.stats.message_delivered();
        Ok(message)
    }

    pub fn is_connected(&self) -> bool {
        self.synchronizer.is_connected()
    }

    /// Messages received but not yet taken
    pub fn pending_messages(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn endpoint(&self) -> String {
        self.target.endpoint()
    }

    pub fn subscribe_topic(&self) -> &str {
        &self.subscribe_topic
    }

    pub fn publish_topic(&self) -> &str {
        &self.publish_topic
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Disconnect and stop the network thread
    ///
    /// Only the first call does anything. Failures are logged; once this
    /// returns no further callbacks touch the queue.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.client.disconnect() {
            warn!("Disconnect from {} failed: {}", self.target.endpoint(), e);
        }
        if let Err(e) = self.client.stop_loop() {
            warn!("Failed to stop network loop: {}", e);
        }
        info!("Communicator for {} shut down", self.target.endpoint());
    }
}

impl<C: BrokerClient + ?Sized> Drop for MqttCommunicator<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
