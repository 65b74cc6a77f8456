//! Mock implementations for testing
//!
//! Provides a scripted [`BrokerClient`] so the communicator can be exercised
//! without an MQTT broker. Connect acknowledgments are delivered from a
//! separate thread, the way a real client's network thread would.

use crate::transport::{
    BrokerClient, ClientCallbacks, ClientError, QoS, CONNACK_ACCEPTED, DISCONNECT_REQUESTED,
    DISCONNECT_UNEXPECTED,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Topic, payload, QoS and retain flag of a recorded publish
pub type PublishedMessage = (String, Vec<u8>, QoS, bool);

/// Calls made against the mock, in order
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    StartLoop,
    StopLoop,
    Connect { host: String, port: u16 },
    Reconnect,
    Subscribe(String),
    Publish(String),
    Disconnect,
}

#[derive(Debug, Clone)]
struct MockBehavior {
    /// Attempt number (connect = 1, each reconnect +1) that gets accepted
    accept_on_attempt: Option<u32>,
    /// CONNACK code reported for attempts before the accepted one
    refuse_code: Option<u8>,
    ack_delay: Duration,
    synchronous_ack: bool,
    fail_start_loop: bool,
    fail_connect: bool,
    fail_reconnect: bool,
    fail_subscribe: bool,
    fail_publish: bool,
    fail_disconnect: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            accept_on_attempt: Some(1),
            refuse_code: None,
            ack_delay: Duration::from_millis(5),
            synchronous_ack: false,
            fail_start_loop: false,
            fail_connect: false,
            fail_reconnect: false,
            fail_subscribe: false,
            fail_publish: false,
            fail_disconnect: false,
        }
    }
}

#[derive(Default)]
struct MockState {
    callbacks: Option<Arc<dyn ClientCallbacks>>,
    attempts: u32,
    connect_calls: u32,
    reconnect_calls: u32,
    last_connect: Option<(String, u16, Duration)>,
    subscriptions: Vec<(String, QoS)>,
    published: Vec<PublishedMessage>,
    calls: Vec<MockCall>,
}

/// Mock MQTT client for testing
#[derive(Default)]
pub struct MockBrokerClient {
    behavior: MockBehavior,
    state: Mutex<MockState>,
}

impl MockBrokerClient {
    /// Mock that accepts the first connect attempt
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the `attempt`-th connect request (1 = initial connect)
    pub fn accept_on_attempt(mut self, attempt: u32) -> Self {
        self.behavior.accept_on_attempt = Some(attempt);
        self
    }

    /// Never report a connection
    pub fn never_connect(mut self) -> Self {
        self.behavior.accept_on_attempt = None;
        self
    }

    /// Report `code` through `on_connect` for attempts that are not accepted
    pub fn refuse_with(mut self, code: u8) -> Self {
        self.behavior.refuse_code = Some(code);
        self
    }

    /// Deliver the acknowledgment inline, from inside `connect_async`
    pub fn accept_synchronously(mut self) -> Self {
        self.behavior.synchronous_ack = true;
        self
    }

    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.behavior.ack_delay = delay;
        self
    }

    pub fn with_start_loop_failure(mut self) -> Self {
        self.behavior.fail_start_loop = true;
        self
    }

    pub fn with_connect_failure(mut self) -> Self {
        self.behavior.fail_connect = true;
        self
    }

    pub fn with_reconnect_failure(mut self) -> Self {
        self.behavior.fail_reconnect = true;
        self
    }

    pub fn with_subscribe_failure(mut self) -> Self {
        self.behavior.fail_subscribe = true;
        self
    }

    pub fn with_publish_failure(mut self) -> Self {
        self.behavior.fail_publish = true;
        self
    }

    pub fn with_disconnect_failure(mut self) -> Self {
        self.behavior.fail_disconnect = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connect_calls(&self) -> u32 {
        self.lock().connect_calls
    }

    pub fn reconnect_calls(&self) -> u32 {
        self.lock().reconnect_calls
    }

    pub fn last_connect(&self) -> Option<(String, u16, Duration)> {
        self.lock().last_connect.clone()
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.lock().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn is_loop_running(&self) -> bool {
        self.lock().callbacks.is_some()
    }

    fn callbacks(&self) -> Option<Arc<dyn ClientCallbacks>> {
        self.lock().callbacks.clone()
    }

    /// Simulate an inbound message; false if the loop is not running
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        match self.callbacks() {
            Some(callbacks) => {
                callbacks.on_message(topic, payload);
                true
            }
            None => false,
        }
    }

    /// Simulate a lost connection
    pub fn drop_connection(&self) -> bool {
        match self.callbacks() {
            Some(callbacks) => {
                callbacks.on_disconnect(DISCONNECT_UNEXPECTED);
                true
            }
            None => false,
        }
    }

    /// Count the attempt and report its outcome like a network thread would
    fn attempt(&self) {
        let (attempt, callbacks) = {
            let mut state = self.lock();
            state.attempts += 1;
            (state.attempts, state.callbacks.clone())
        };
        let Some(callbacks) = callbacks else {
            return;
        };

        let code = if self.behavior.accept_on_attempt == Some(attempt) {
            CONNACK_ACCEPTED
        } else if let Some(code) = self.behavior.refuse_code {
            code
        } else {
            return;
        };

        if self.behavior.synchronous_ack {
            callbacks.on_connect(code);
        } else {
            let delay = self.behavior.ack_delay;
            thread::spawn(move || {
                thread::sleep(delay);
                callbacks.on_connect(code);
            });
        }
    }
}

impl BrokerClient for MockBrokerClient {
    fn start_loop(&self, callbacks: Arc<dyn ClientCallbacks>) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.calls.push(MockCall::StartLoop);
        if self.behavior.fail_start_loop {
            return Err(ClientError::rejected("Mock loop start failure"));
        }
        if state.callbacks.is_some() {
            return Err(ClientError::LoopAlreadyRunning);
        }
        state.callbacks = Some(callbacks);
        Ok(())
    }

    fn stop_loop(&self) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.calls.push(MockCall::StopLoop);
        state
            .callbacks
            .take()
            .map(|_| ())
            .ok_or(ClientError::LoopNotRunning)
    }

    fn connect_async(
        &self,
        host: &str,
        port: u16,
        keepalive: Duration,
    ) -> Result<(), ClientError> {
        {
            let mut state = self.lock();
            state.calls.push(MockCall::Connect {
                host: host.to_string(),
                port,
            });
            state.connect_calls += 1;
            if self.behavior.fail_connect {
                return Err(ClientError::rejected("Mock connect failure"));
            }
            state.last_connect = Some((host.to_string(), port, keepalive));
        }
        self.attempt();
        Ok(())
    }

    fn reconnect_async(&self) -> Result<(), ClientError> {
        {
            let mut state = self.lock();
            state.calls.push(MockCall::Reconnect);
            state.reconnect_calls += 1;
            if self.behavior.fail_reconnect {
                return Err(ClientError::rejected("Mock reconnect failure"));
            }
            if state.last_connect.is_none() {
                return Err(ClientError::NotConfigured);
            }
        }
        self.attempt();
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.calls.push(MockCall::Subscribe(topic.to_string()));
        if self.behavior.fail_subscribe {
            return Err(ClientError::rejected("Mock subscribe failure"));
        }
        state.subscriptions.push((topic.to_string(), qos));
        Ok(())
    }

    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.calls.push(MockCall::Publish(topic.to_string()));
        if self.behavior.fail_publish {
            return Err(ClientError::rejected("Mock publish failure"));
        }
        state
            .published
            .push((topic.to_string(), payload.to_vec(), qos, retain));
        Ok(())
    }

    fn disconnect(&self) -> Result<(), ClientError> {
        let callbacks = {
            let mut state = self.lock();
            state.calls.push(MockCall::Disconnect);
            if self.behavior.fail_disconnect {
                return Err(ClientError::NoConnection);
            }
            state.callbacks.clone()
        };
        if let Some(callbacks) = callbacks {
            callbacks.on_disconnect(DISCONNECT_REQUESTED);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Recorder {
        connects: AtomicU32,
        disconnects: AtomicU32,
        messages: AtomicU32,
    }

    impl ClientCallbacks for Recorder {
        fn on_connect(&self, _code: u8) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }

        fn on_disconnect(&self, _code: u8) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        fn on_message(&self, _topic: &str, _payload: &[u8]) {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_deliver_requires_running_loop() {
        let client = MockBrokerClient::new();
        assert!(!client.deliver("t", b"p"));

        let recorder = Arc::new(Recorder::default());
        client.start_loop(recorder.clone()).unwrap();
        assert!(client.deliver("t", b"p"));
        assert_eq!(recorder.messages.load(Ordering::SeqCst), 1);

        client.stop_loop().unwrap();
        assert!(!client.deliver("t", b"p"));
    }

    #[test]
    fn test_start_loop_twice_fails() {
        let client = MockBrokerClient::new();
        client.start_loop(Arc::new(Recorder::default())).unwrap();
        assert_eq!(
            client.start_loop(Arc::new(Recorder::default())),
            Err(ClientError::LoopAlreadyRunning)
        );
    }

    #[test]
    fn test_synchronous_ack_fires_inside_connect() {
        let client = MockBrokerClient::new().accept_synchronously();
        let recorder = Arc::new(Recorder::default());
        client.start_loop(recorder.clone()).unwrap();

        client
            .connect_async("localhost", 1883, Duration::from_secs(60))
            .unwrap();
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reconnect_without_connect_is_rejected() {
        let client = MockBrokerClient::new();
        assert_eq!(client.reconnect_async(), Err(ClientError::NotConfigured));
    }

    #[test]
    fn test_records_publish_and_call_order() {
        let client = MockBrokerClient::new();
        client
            .publish("out", b"hello", QoS::ExactlyOnce, false)
            .unwrap();
        client.disconnect().unwrap();

        assert_eq!(
            client.published(),
            vec![("out".to_string(), b"hello".to_vec(), QoS::ExactlyOnce, false)]
        );
        assert_eq!(
            client.calls(),
            vec![MockCall::Publish("out".to_string()), MockCall::Disconnect]
        );
    }
}
