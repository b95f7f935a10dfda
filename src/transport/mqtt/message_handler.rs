//! Pure routing of rumqttc events
//!
//! The event loop task asks [`MessageHandler::route_mqtt_event`] what an
//! event means for the session and acts on the answer.

use bytes::Bytes;
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT event to the appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                },
                Packet::PubAck(ack) => EventRoute::DeliveryComplete {
                    packet_id: ack.pkid,
                },
                Packet::PubComp(comp) => EventRoute::DeliveryComplete {
                    packet_id: comp.pkid,
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    rejected: Self::subscription_rejected(&suback.return_codes),
                },
                Packet::Disconnect => EventRoute::BrokerDisconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Whether any filter in a SubAck was refused by the broker
    pub fn subscription_rejected(return_codes: &[SubscribeReasonCode]) -> bool {
        return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    /// Broker finished the QoS handshake for one of our publishes
    DeliveryComplete { packet_id: u16 },
    /// Subscription answered; `rejected` when the broker refused it
    SubscriptionConfirmed { packet_id: u16, rejected: bool },
    /// Broker sent DISCONNECT
    BrokerDisconnected,
    /// We sent DISCONNECT; the connection is closing on our request
    DisconnectSent,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
