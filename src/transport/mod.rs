//! Transport layer for the chat client
//!
//! [`Transport`] abstracts the raw broker connection so the session state
//! machine above it can be driven by the real MQTT client or by an in-memory
//! mock. Inbound traffic never comes back through a return value: the
//! transport's network task pushes [`TransportEvent`]s into an [`EventSink`],
//! a fire-and-forget queue drained by a single consumer.

use bytes::Bytes;
use rumqttc::QoS;
use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::{SessionState, TransportError};

/// Last-will message registered with the broker on connect
#[derive(Debug, Clone, PartialEq)]
pub struct WillMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// Parameters for a single connection attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub will: WillMessage,
}

/// Something the transport observed on an open connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    /// A publish arrived on a subscribed topic
    MessageArrived { topic: String, payload: Bytes },
    /// The connection dropped; no further events follow for it
    ConnectionLost { reason: String },
    /// The broker acknowledged one of our publishes
    DeliveryComplete { packet_id: u16 },
}

/// A transport event tagged with the connection it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    /// Sequence number of the connection attempt that produced the event
    pub connection: u64,
    pub kind: TransportEventKind,
}

/// Non-blocking hand-off from the transport's network task
#[derive(Debug, Clone)]
pub struct EventSink {
    connection: u64,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    pub fn new(connection: u64, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { connection, tx }
    }

    pub fn connection(&self) -> u64 {
        self.connection
    }

    pub fn message_arrived(&self, topic: String, payload: Bytes) {
        self.emit(TransportEventKind::MessageArrived { topic, payload });
    }

    pub fn connection_lost(&self, reason: impl Into<String>) {
        self.emit(TransportEventKind::ConnectionLost {
            reason: reason.into(),
        });
    }

    pub fn delivery_complete(&self, packet_id: u16) {
        self.emit(TransportEventKind::DeliveryComplete { packet_id });
    }

    fn emit(&self, kind: TransportEventKind) {
        // A closed receiver means the session is gone; nothing left to notify
        let _ = self.tx.send(TransportEvent {
            connection: self.connection,
            kind,
        });
    }
}

/// Raw broker connection used by the transport session
///
/// Implementations must not reconnect on their own: once a connection is
/// lost they report it through the sink and stay down until `open` is called
/// again.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection and resolve once the broker has accepted it
    async fn open(&self, request: ConnectRequest, events: EventSink) -> Result<(), TransportError>;

    /// Subscribe the open connection to `topic`
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    /// Publish a non-retained message on the open connection
    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Close the connection; a no-op when nothing is open
    async fn close(&self) -> Result<(), TransportError>;
}

/// Type alias for the MQTT transport
pub type MqttTransport = mqtt::MqttClient;
