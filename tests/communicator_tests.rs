//! End-to-end behavior of the communicator against the scripted client
//!
//! The mock plays the client library: it reports connect outcomes from its
//! own thread and injects inbound messages through the registered callbacks,
//! so these tests exercise the same paths a real network thread would.

use mqtt_communicator::testing::{MockBrokerClient, MockCall};
use mqtt_communicator::transport::QoS;
use mqtt_communicator::{CommunicatorError, CommunicatorOptions, MqttCommunicator};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn options() -> CommunicatorOptions {
    CommunicatorOptions::new("broker.test", 1883, "node/in", "node/out")
        .with_poll_interval(Duration::from_millis(100))
        .with_timeout(Duration::from_secs(5))
}

fn connect(mock: MockBrokerClient) -> (Arc<MockBrokerClient>, MqttCommunicator<MockBrokerClient>) {
    let client = Arc::new(mock);
    let communicator = MqttCommunicator::connect(Arc::clone(&client), options()).unwrap();
    (client, communicator)
}

#[test]
fn test_accept_on_second_attempt_uses_one_reconnect() {
    let (client, communicator) = connect(MockBrokerClient::new().accept_on_attempt(2));

    assert!(communicator.is_connected());
    assert_eq!(client.connect_calls(), 1);
    assert_eq!(client.reconnect_calls(), 1);
}

#[test]
fn test_default_poll_interval_retries_after_three_seconds() {
    let client = Arc::new(MockBrokerClient::new().accept_on_attempt(2));
    let options = CommunicatorOptions::new("broker.test", 1883, "node/in", "node/out")
        .with_timeout(Duration::from_secs(10));

    let start = Instant::now();
    let _communicator = MqttCommunicator::connect(Arc::clone(&client), options).unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(3), "reconnected after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "reconnected after {elapsed:?}");
}

#[test]
fn test_never_connecting_client_times_out() {
    let client = Arc::new(MockBrokerClient::new().never_connect());
    let options = CommunicatorOptions::new("broker.test", 1883, "node/in", "node/out")
        .with_timeout(Duration::from_millis(500));

    let start = Instant::now();
    let result = MqttCommunicator::connect(Arc::clone(&client), options);
    let elapsed = start.elapsed();

    match result {
        Err(e) => {
            assert!(matches!(e, CommunicatorError::ConnectTimeout { .. }));
            assert!(e.is_timeout());
        }
        Ok(_) => panic!("Expected ConnectTimeout"),
    }
    assert!(elapsed >= Duration::from_millis(500), "failed after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(3500), "failed after {elapsed:?}");
    assert!(!client.is_loop_running());
}

#[test]
fn test_refused_attempts_keep_retrying() {
    let (client, communicator) =
        connect(MockBrokerClient::new().refuse_with(5).accept_on_attempt(3));

    assert!(communicator.is_connected());
    assert_eq!(client.reconnect_calls(), 2);

    let stats = communicator.stats();
    assert_eq!(stats.connections_refused, 2);
    assert_eq!(stats.connections_established, 1);
}

#[test]
fn test_synchronous_rejection_fails_fast() {
    let client = Arc::new(MockBrokerClient::new().with_connect_failure());
    let result = MqttCommunicator::connect(Arc::clone(&client), options());

    assert!(matches!(result, Err(CommunicatorError::ConnectionFailed(_))));
    assert_eq!(client.reconnect_calls(), 0);
}

#[test]
fn test_send_failure_reports_publish_error_and_keeps_queue() {
    let (client, communicator) = connect(MockBrokerClient::new().with_publish_failure());
    client.deliver("node/in", b"first");
    client.deliver("node/in", b"second");

    let result = communicator.send("hello");

    assert!(matches!(result, Err(CommunicatorError::PublishFailed(_))));
    assert_eq!(communicator.pending_messages(), 2);
    assert_eq!(communicator.get_message().payload_str(), "first");
}

#[test]
fn test_send_publishes_at_qos_two_without_retain() {
    let (client, communicator) = connect(MockBrokerClient::new());

    communicator.send("hello").unwrap();

    assert_eq!(
        client.published(),
        vec![("node/out".to_string(), b"hello".to_vec(), QoS::ExactlyOnce, false)]
    );
}

#[test]
fn test_extra_subscription() {
    let (client, communicator) = connect(MockBrokerClient::new());

    communicator.subscribe("node/broadcast/#").unwrap();

    assert_eq!(
        client.subscriptions(),
        vec![
            ("node/in".to_string(), QoS::ExactlyOnce),
            ("node/broadcast/#".to_string(), QoS::ExactlyOnce),
        ]
    );
}

#[test]
fn test_messages_keep_their_topic() {
    let (client, communicator) = connect(MockBrokerClient::new());

    client.deliver("node/in", b"a");
    client.deliver("node/broadcast/all", b"b");

    assert_eq!(communicator.get_message().topic(), "node/in");
    assert_eq!(communicator.get_message().topic(), "node/broadcast/all");
}

#[test]
fn test_timed_receive_on_empty_queue() {
    let (_client, communicator) = connect(MockBrokerClient::new());

    let start = Instant::now();
    let result = communicator.get_message_timeout(Duration::from_millis(100));

    assert!(matches!(result, Err(CommunicatorError::ReceiveTimeout { .. })));
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(communicator.pending_messages(), 0);
}

#[test]
fn test_multiple_consumers_receive_each_message_once() {
    const PRODUCERS: usize = 3;
    const PER_PRODUCER: usize = 200;
    const CONSUMERS: usize = 4;
    let total = PRODUCERS * PER_PRODUCER;

    let (client, communicator) = connect(MockBrokerClient::new());
    let communicator = Arc::new(communicator);

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let communicator = Arc::clone(&communicator);
            thread::spawn(move || {
                let mut received = Vec::new();
                while let Ok(message) = communicator.get_message_timeout(Duration::from_millis(500))
                {
                    received.push(message.payload_str().into_owned());
                }
                received
            })
        })
        .collect();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    client.deliver("node/in", format!("{producer}-{i}").as_bytes());
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }

    let mut seen = HashSet::new();
    for consumer in consumers {
        for payload in consumer.join().unwrap() {
            assert!(seen.insert(payload), "message delivered twice");
        }
    }

    assert_eq!(seen.len(), total);
    assert_eq!(communicator.stats().messages_delivered, total as u64);
}

#[test]
fn test_unexpected_disconnect_then_messages_still_drain() {
    let (client, communicator) = connect(MockBrokerClient::new());
    client.deliver("node/in", b"before");

    client.drop_connection();

    assert!(!communicator.is_connected());
    assert_eq!(communicator.get_message().payload_str(), "before");
}

#[test]
fn test_drop_tears_down_in_order() {
    let (client, communicator) = connect(MockBrokerClient::new());
    drop(communicator);

    let calls = client.calls();
    assert_eq!(calls.first(), Some(&MockCall::StartLoop));
    assert_eq!(
        &calls[calls.len() - 2..],
        &[MockCall::Disconnect, MockCall::StopLoop]
    );
    assert!(!client.deliver("node/in", b"late"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_delivery_order_is_preserved(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..50)
    ) {
        let (client, communicator) = connect(MockBrokerClient::new().accept_synchronously());

        for payload in &payloads {
            prop_assert!(client.deliver("node/in", payload));
        }

        for payload in &payloads {
            let message = communicator.get_message();
            prop_assert_eq!(&message.payload()[..], &payload[..]);
        }
        prop_assert_eq!(communicator.pending_messages(), 0);
    }
}
