//! Pure routing of rumqttc event-loop output
//!
//! Every item the event loop yields is classified here before the network
//! thread turns it into a [`ClientCallbacks`](crate::transport::ClientCallbacks)
//! notification.

use bytes::Bytes;
use rumqttc::{ConnectReturnCode, ConnectionError, Event, Outgoing, Packet};

/// Pure routing decisions for event-loop output
pub struct MessageHandler;

impl MessageHandler {
    /// Route a successfully polled event (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    code: Self::connack_code(connack.code),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Route a poll error (pure routing decision)
    pub fn route_connection_error(error: &ConnectionError) -> ErrorRoute {
        match error {
            ConnectionError::ConnectionRefused(code) => ErrorRoute::Refused {
                code: Self::connack_code(*code),
            },
            other => ErrorRoute::Lost(other.to_string()),
        }
    }

    /// Numeric MQTT 3.1.1 CONNACK return code
    pub fn connack_code(code: ConnectReturnCode) -> u8 {
        match code {
            ConnectReturnCode::Success => 0,
            ConnectReturnCode::RefusedProtocolVersion => 1,
            ConnectReturnCode::BadClientId => 2,
            ConnectReturnCode::ServiceUnavailable => 3,
            ConnectReturnCode::BadUserNamePassword => 4,
            ConnectReturnCode::NotAuthorized => 5,
        }
    }
}

/// Routing decisions for polled events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker answered the connect request
    ConnectionAcknowledged { code: u8 },
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// Our DISCONNECT left the socket
    DisconnectSent,
    /// Broker confirmed a subscription
    SubscriptionConfirmed { packet_id: u16 },
    /// Infrastructure event (PingResp, PubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Routing decisions for poll errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorRoute {
    /// Broker refused the connection with a CONNACK code
    Refused { code: u8 },
    /// Socket or protocol failure
    Lost(String),
}
