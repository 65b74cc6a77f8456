//! rumqttc-backed [`BrokerClient`]
//!
//! The network thread is a dedicated OS thread running a current-thread tokio
//! runtime. It owns the rumqttc `EventLoop`, turns polled events into
//! [`ClientCallbacks`] notifications and backs off between failed attempts.
//! Connect requests and shutdown reach it over an unbounded command channel,
//! so every `BrokerClient` call returns without waiting on the network.

use super::connection::{configure_mqtt_options, ReconnectConfig};
use super::message_handler::{ErrorRoute, EventRoute, MessageHandler};
use crate::config::{CommunicatorConfig, ConfigError};
use crate::network_span;
use crate::transport::{
    BrokerClient, ClientCallbacks, ClientError, QoS, DISCONNECT_REQUESTED, DISCONNECT_UNEXPECTED,
};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the request channel between `AsyncClient` and its event loop
const DEFAULT_REQUEST_CAPACITY: usize = 64;

/// Longest time shutdown waits for queued requests to reach the socket
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Requests handed to the network thread
#[derive(Debug)]
enum Command {
    Connect(MqttOptions),
    /// Stop; with `drain` the session is polled until the DISCONNECT is sent
    Shutdown { drain: bool },
}

/// Running network thread
struct LoopHandle {
    commands: mpsc::UnboundedSender<Command>,
    thread: JoinHandle<()>,
}

/// MQTT 3.1.1 client driving a rumqttc event loop on its own thread
pub struct RumqttcClient {
    client_id: String,
    credentials: Option<(String, String)>,
    reconnect_config: ReconnectConfig,
    request_capacity: usize,
    options: Mutex<Option<MqttOptions>>,
    session: Arc<Mutex<Option<AsyncClient>>>,
    handle: Mutex<Option<LoopHandle>>,
    disconnect_requested: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RumqttcClient {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            credentials: None,
            reconnect_config: ReconnectConfig::default(),
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            options: Mutex::new(None),
            session: Arc::new(Mutex::new(None)),
            handle: Mutex::new(None),
            disconnect_requested: AtomicBool::new(false),
        }
    }

    /// Build a client from the `[communicator]`, `[mqtt]` and `[reconnect]` sections
    pub fn from_config(config: &CommunicatorConfig) -> Result<Self, ConfigError> {
        let client = Self::new(config.communicator.id.clone())
            .with_reconnect_config(ReconnectConfig::from(&config.reconnect));

        Ok(match config.credentials()? {
            Some((username, password)) => client.with_credentials(username, password),
            None => client,
        })
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    pub fn with_request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity.max(1);
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_loop_running(&self) -> bool {
        lock(&self.handle).is_some()
    }

    fn send_command(&self, command: Command) -> Result<(), ClientError> {
        let handle = lock(&self.handle);
        let handle = handle.as_ref().ok_or(ClientError::LoopNotRunning)?;
        handle
            .commands
            .send(command)
            .map_err(|_| ClientError::LoopNotRunning)
    }

    fn with_session<F>(&self, request: F) -> Result<(), ClientError>
    where
        F: FnOnce(&AsyncClient) -> Result<(), rumqttc::ClientError>,
    {
        let session = lock(&self.session);
        let client = session.as_ref().ok_or(ClientError::NoConnection)?;
        request(client).map_err(|e| ClientError::rejected(e.to_string()))
    }
}

impl BrokerClient for RumqttcClient {
    fn start_loop(&self, callbacks: Arc<dyn ClientCallbacks>) -> Result<(), ClientError> {
        let mut handle = lock(&self.handle);
        if handle.is_some() {
            return Err(ClientError::LoopAlreadyRunning);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ClientError::rejected(format!("failed to build runtime: {e}")))?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let network = NetworkLoop::new(
            command_rx,
            Arc::clone(&self.session),
            callbacks,
            self.reconnect_config.clone(),
            self.request_capacity,
        );
        let span = network_span!(client_id = %self.client_id);

        let thread = thread::Builder::new()
            .name("mqtt-network".to_string())
            .spawn(move || runtime.block_on(network.run().instrument(span)))
            .map_err(|e| ClientError::rejected(format!("failed to spawn network thread: {e}")))?;

        *handle = Some(LoopHandle { commands, thread });
        debug!("Network thread started for client {}", self.client_id);
        Ok(())
    }

    fn stop_loop(&self) -> Result<(), ClientError> {
        let handle = lock(&self.handle)
            .take()
            .ok_or(ClientError::LoopNotRunning)?;

        let drain = self.disconnect_requested.swap(false, Ordering::SeqCst);
        // The thread may already have exited if every sender was dropped
        let _ = handle.commands.send(Command::Shutdown { drain });
        let joined = handle.thread.join();
        lock(&self.session).take();

        joined.map_err(|_| ClientError::rejected("network thread panicked"))?;
        debug!("Network thread stopped for client {}", self.client_id);
        Ok(())
    }

    fn connect_async(&self, host: &str, port: u16, keepalive: Duration) -> Result<(), ClientError> {
        let options = configure_mqtt_options(
            &self.client_id,
            host,
            port,
            keepalive,
            self.credentials.as_ref(),
        )?;

        self.send_command(Command::Connect(options.clone()))?;
        *lock(&self.options) = Some(options);
        Ok(())
    }

    fn reconnect_async(&self) -> Result<(), ClientError> {
        let options = lock(&self.options)
            .clone()
            .ok_or(ClientError::NotConfigured)?;
        self.send_command(Command::Connect(options))
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ClientError> {
        self.with_session(|client| client.try_subscribe(topic, qos))
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), ClientError> {
        self.with_session(|client| client.try_publish(topic, qos, retain, payload.to_vec()))
    }

    fn disconnect(&self) -> Result<(), ClientError> {
        self.with_session(|client| client.try_disconnect())?;
        self.disconnect_requested.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        if self.is_loop_running() {
            if let Err(e) = self.stop_loop() {
                warn!("Failed to stop network thread on drop: {}", e);
            }
        }
    }
}

/// What woke the network thread
enum Step {
    Command(Option<Command>),
    Event(Result<Event, ConnectionError>),
}

/// State owned by the network thread
struct NetworkLoop {
    commands: mpsc::UnboundedReceiver<Command>,
    session: Arc<Mutex<Option<AsyncClient>>>,
    callbacks: Arc<dyn ClientCallbacks>,
    reconnect_config: ReconnectConfig,
    request_capacity: usize,
    event_loop: Option<EventLoop>,
    connected: bool,
    failures: u32,
    drain_on_exit: bool,
}

impl NetworkLoop {
    fn new(
        commands: mpsc::UnboundedReceiver<Command>,
        session: Arc<Mutex<Option<AsyncClient>>>,
        callbacks: Arc<dyn ClientCallbacks>,
        reconnect_config: ReconnectConfig,
        request_capacity: usize,
    ) -> Self {
        Self {
            commands,
            session,
            callbacks,
            reconnect_config,
            request_capacity,
            event_loop: None,
            connected: false,
            failures: 0,
            drain_on_exit: false,
        }
    }

    async fn run(mut self) {
        info!("Network loop started");

        loop {
            // Every command either replaces the session or ends the loop, so
            // abandoning an in-flight poll here loses nothing we still need
            let step = match self.event_loop.as_mut() {
                None => Step::Command(self.commands.recv().await),
                Some(event_loop) => tokio::select! {
                    command = self.commands.recv() => Step::Command(command),
                    event = event_loop.poll() => Step::Event(event),
                },
            };

            let keep_running = match step {
                Step::Command(command) => self.handle_command(command),
                Step::Event(Ok(event)) => {
                    self.handle_event(event);
                    true
                }
                Step::Event(Err(e)) => self.handle_error(e).await,
            };

            if !keep_running {
                break;
            }
        }

        if self.drain_on_exit {
            self.drain().await;
        }
        self.event_loop = None;
        info!("Network loop stopped");
    }

    /// Keep polling until the requested DISCONNECT has left the socket
    async fn drain(&mut self) {
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while let Some(event_loop) = self.event_loop.as_mut() {
                match event_loop.poll().await {
                    Ok(event) => self.handle_event(event),
                    Err(e) => {
                        debug!("Session ended while draining: {}", e);
                        self.event_loop = None;
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Timed out flushing pending requests before shutdown");
        }
    }

    /// Returns false when the loop should exit
    fn handle_command(&mut self, command: Option<Command>) -> bool {
        match command {
            Some(Command::Connect(options)) => {
                self.apply_new_connection(options);
                true
            }
            Some(Command::Shutdown { drain }) => {
                debug!(drain, "Shutdown requested");
                self.drain_on_exit = drain;
                false
            }
            None => false,
        }
    }

    fn apply_new_connection(&mut self, options: MqttOptions) {
        let (host, port) = options.broker_address();
        let (client, event_loop) = AsyncClient::new(options, self.request_capacity);

        *lock(&self.session) = Some(client);
        self.event_loop = Some(event_loop);
        self.failures = 0;
        debug!("Created new session for {}:{}", host, port);

        if self.connected {
            self.connected = false;
            self.callbacks.on_disconnect(DISCONNECT_REQUESTED);
        }
    }

    fn handle_event(&mut self, event: Event) {
        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::ConnectionAcknowledged { code } => {
                if code == 0 {
                    self.connected = true;
                    self.failures = 0;
                }
                self.callbacks.on_connect(code);
            }
            EventRoute::MessageReceived { topic, payload } => {
                self.callbacks.on_message(&topic, &payload);
            }
            EventRoute::DisconnectSent => {
                self.event_loop = None;
                if self.connected {
                    self.connected = false;
                    self.callbacks.on_disconnect(DISCONNECT_REQUESTED);
                }
            }
            EventRoute::SubscriptionConfirmed { packet_id } => {
                debug!("Subscription confirmed: packet {}", packet_id);
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!("Infrastructure event: {}", event);
            }
            EventRoute::OutgoingEvent => {}
        }
    }

    /// Returns false when shutdown arrived during the backoff
    async fn handle_error(&mut self, error: ConnectionError) -> bool {
        match MessageHandler::route_connection_error(&error) {
            ErrorRoute::Refused { code } => {
                warn!("Broker refused connection with code {}", code);
                self.callbacks.on_connect(code);
            }
            ErrorRoute::Lost(reason) => {
                if self.connected {
                    self.connected = false;
                    error!("Connection lost: {}", reason);
                    self.callbacks.on_disconnect(DISCONNECT_UNEXPECTED);
                } else {
                    debug!("Connection attempt failed: {}", reason);
                }
            }
        }

        self.failures = self.failures.saturating_add(1);
        let delay_ms = self.reconnect_config.calculate_backoff_delay(self.failures);
        self.interruptible_sleep(delay_ms).await
    }

    /// Sleep for the backoff unless a command arrives first
    /// Returns false if shutdown was requested
    async fn interruptible_sleep(&mut self, delay_ms: u64) -> bool {
        tokio::select! {
            command = self.commands.recv() => self.handle_command(command),
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingCallbacks {
        accepted: AtomicUsize,
        refused: AtomicUsize,
        disconnects: AtomicUsize,
        messages: AtomicUsize,
    }

    impl ClientCallbacks for CountingCallbacks {
        fn on_connect(&self, code: u8) {
            if code == 0 {
                self.accepted.fetch_add(1, Ordering::SeqCst);
            } else {
                self.refused.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_disconnect(&self, _code: u8) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        fn on_message(&self, _topic: &str, _payload: &[u8]) {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_loop() -> (mpsc::UnboundedSender<Command>, NetworkLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        let network = NetworkLoop::new(
            rx,
            Arc::new(Mutex::new(None)),
            Arc::new(CountingCallbacks::default()),
            ReconnectConfig::default(),
            DEFAULT_REQUEST_CAPACITY,
        );
        (tx, network)
    }

    #[test]
    fn test_start_loop_twice_fails() {
        let client = RumqttcClient::new("test-client");
        let callbacks = Arc::new(CountingCallbacks::default());

        client.start_loop(callbacks.clone()).unwrap();
        assert!(client.is_loop_running());
        assert_eq!(
            client.start_loop(callbacks),
            Err(ClientError::LoopAlreadyRunning)
        );

        client.stop_loop().unwrap();
        assert!(!client.is_loop_running());
    }

    #[test]
    fn test_stop_loop_without_start() {
        let client = RumqttcClient::new("test-client");
        assert_eq!(client.stop_loop(), Err(ClientError::LoopNotRunning));
    }

    #[test]
    fn test_connect_requires_running_loop() {
        let client = RumqttcClient::new("test-client");
        let result = client.connect_async("localhost", 1883, Duration::from_secs(60));
        assert_eq!(result, Err(ClientError::LoopNotRunning));
    }

    #[test]
    fn test_connect_rejects_invalid_arguments() {
        let client = RumqttcClient::new("test-client");
        let result = client.connect_async("localhost", 0, Duration::from_secs(60));
        assert!(matches!(result, Err(ClientError::InvalidArgument(_))));
    }

    #[test]
    fn test_reconnect_before_connect() {
        let client = RumqttcClient::new("test-client");
        client
            .start_loop(Arc::new(CountingCallbacks::default()))
            .unwrap();

        assert_eq!(client.reconnect_async(), Err(ClientError::NotConfigured));
        client.stop_loop().unwrap();
    }

    #[test]
    fn test_requests_without_session() {
        let client = RumqttcClient::new("test-client");

        assert_eq!(
            client.subscribe("test/topic", QoS::ExactlyOnce),
            Err(ClientError::NoConnection)
        );
        assert_eq!(
            client.publish("test/topic", b"hello", QoS::ExactlyOnce, false),
            Err(ClientError::NoConnection)
        );
        assert_eq!(client.disconnect(), Err(ClientError::NoConnection));
    }

    #[test]
    fn test_unreachable_broker_never_acknowledges() {
        let client = RumqttcClient::new("test-client").with_reconnect_config(ReconnectConfig {
            backoff_pattern: vec![10],
            sustained_delay: 10,
        });
        let callbacks = Arc::new(CountingCallbacks::default());
        client.start_loop(callbacks.clone()).unwrap();

        // Nothing listens on port 1
        client
            .connect_async("127.0.0.1", 1, Duration::from_secs(60))
            .unwrap();
        thread::sleep(Duration::from_millis(200));
        client.reconnect_async().unwrap();
        thread::sleep(Duration::from_millis(100));

        assert_eq!(callbacks.accepted.load(Ordering::SeqCst), 0);
        assert_eq!(callbacks.disconnects.load(Ordering::SeqCst), 0);

        client.stop_loop().unwrap();
    }

    #[test]
    fn test_from_config() {
        let config = CommunicatorConfig::from_toml_str(
            r#"
[communicator]
id = "sensor-node"
subscribe_topic = "in"
publish_topic = "out"

[mqtt]
host = "localhost"

[reconnect]
backoff_pattern_ms = [1, 2]
sustained_delay_ms = 3
"#,
        )
        .unwrap();

        let client = RumqttcClient::from_config(&config).unwrap();
        assert_eq!(client.client_id(), "sensor-node");
        assert_eq!(client.reconnect_config.calculate_backoff_delay(3), 3);
        assert!(client.credentials.is_none());
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_tx, mut network) = test_loop();

        let start = tokio::time::Instant::now();
        let result = network.interruptible_sleep(50).await;

        assert!(result, "Sleep should complete normally");
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (tx, mut network) = test_loop();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(Command::Shutdown { drain: false });
        });

        let start = tokio::time::Instant::now();
        let result = network.interruptible_sleep(5000).await;

        assert!(!result, "Sleep should be interrupted by shutdown");
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_closed_command_channel_stops_loop() {
        let (tx, mut network) = test_loop();
        drop(tx);
        assert!(!network.interruptible_sleep(5000).await);
    }
}
