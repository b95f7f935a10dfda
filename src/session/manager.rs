//! Chat session orchestrator
//!
//! [`ChatSession`] composes the transport session, the reconnection
//! controller and the message store behind the surface the display layer
//! uses: `connect`, `send`, `messages` and `shutdown`.
//!
//! All inbound traffic flows through one pump task that drains the
//! transport's event queue. It is the only writer of the message store, so
//! messages appear in exactly the order the transport delivered them.

use super::reconnect::ReconnectionController;
use super::store::{MessageFeed, MessageStore};
use super::transport_session::{
    ConnectOutcome, SessionEvent, TransportSession, TransportSettings,
};
use crate::config::ChatConfig;
use crate::error::ChatResult;
use crate::protocol::{decode, encode, generate_client_id, now_millis, ChatMessage};
use crate::transport::{MqttTransport, SessionState, Transport, TransportEvent, TransportEventKind};
use rumqttc::QoS;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Everything a [`ChatSession`] needs besides its transport
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub client_id: String,
    pub topic: String,
    pub qos: QoS,
    pub will_message: String,
    pub reconnect_delay: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &ChatConfig, client_id: impl Into<String>) -> ChatResult<Self> {
        Ok(Self {
            client_id: client_id.into(),
            topic: config.broker.topic.clone(),
            qos: config.qos()?,
            will_message: config.client.will_message.clone(),
            reconnect_delay: config.reconnect_delay(),
        })
    }

    fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            client_id: self.client_id.clone(),
            topic: self.topic.clone(),
            qos: self.qos,
            will_message: self.will_message.clone(),
        }
    }
}

/// Result of [`ChatSession::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the transport
    Published,
    /// Blank input; nothing was sent
    Ignored,
}

/// Public chat session
pub struct ChatSession<T: Transport = MqttTransport> {
    client_id: String,
    session: Arc<TransportSession<T>>,
    controller: Arc<ReconnectionController<T>>,
    store: Arc<MessageStore>,
    pump: JoinHandle<()>,
    supervisor: JoinHandle<()>,
    shut_down: AtomicBool,
}

impl ChatSession<MqttTransport> {
    /// Build a session against the configured broker
    ///
    /// A fresh client identifier is generated; it stays the same across
    /// reconnects for the life of the session.
    pub fn from_config(config: &ChatConfig) -> ChatResult<Self> {
        config.validate()?;
        let client_id = generate_client_id(&config.client.id_prefix);
        let settings = SessionSettings::from_config(config, client_id.clone())?;
        let transport = MqttTransport::new(client_id, config.clone());
        Ok(Self::new(settings, Arc::new(transport)))
    }
}

impl<T: Transport> ChatSession<T> {
    /// Create a session over `transport` and start its background tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(settings: SessionSettings, transport: Arc<T>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Arc::new(TransportSession::new(
            transport,
            settings.transport_settings(),
            events_tx,
        ));
        let controller = ReconnectionController::new(session.clone(), settings.reconnect_delay);
        let supervisor = controller.start();

        let store = Arc::new(MessageStore::new());
        let pump = tokio::spawn(pump_transport_events(
            events_rx,
            session.clone(),
            store.clone(),
            settings.client_id.clone(),
        ));

        info!(client_id = %settings.client_id, topic = %settings.topic, "Chat session created");

        Self {
            client_id: settings.client_id,
            session,
            controller,
            store,
            pump,
            supervisor,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Receiver that observes every state transition
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.session.watch_state()
    }

    /// Connection-lost and connect-failed notifications
    pub fn connection_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe_events()
    }

    /// Ordered feed of delivered messages, starting from the first
    pub fn messages(&self) -> MessageFeed {
        self.store.feed()
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.store.snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Start connecting unless already connecting or connected
    ///
    /// A failed attempt is returned to the caller and also handed to the
    /// reconnection controller, which retries after its delay.
    pub async fn connect(&self) -> ChatResult<ConnectOutcome> {
        if self.is_shut_down() {
            debug!("Connect requested after shutdown, ignoring");
            return Ok(ConnectOutcome::Cancelled);
        }

        let span = crate::session_span!(client_id = %self.client_id, op = "connect");
        let outcome = self.session.connect().instrument(span).await?;

        if outcome == ConnectOutcome::Connected && self.is_shut_down() {
            // Shutdown overtook the attempt; close what it opened
            self.session.disconnect().await?;
            return Ok(ConnectOutcome::Cancelled);
        }

        Ok(outcome)
    }

    /// Publish `text` stamped with the current time
    ///
    /// Blank input is ignored. While not connected this fails with
    /// `NotConnected` and the message is dropped. The sent message is not
    /// added locally; it shows up when the broker delivers it back.
    pub async fn send(&self, text: &str) -> ChatResult<SendOutcome> {
        if text.trim().is_empty() {
            debug!("Ignoring blank message");
            return Ok(SendOutcome::Ignored);
        }

        let payload = encode(&self.client_id, now_millis(), text);
        self.session.publish(payload).await?;

        debug!(client_id = %self.client_id, bytes = text.len(), "Message published");
        Ok(SendOutcome::Published)
    }

    /// Cancel pending reconnection and close the connection
    ///
    /// Idempotent. No connect attempt is scheduled afterwards.
    pub async fn shutdown(&self) -> ChatResult<()> {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            info!(client_id = %self.client_id, "Shutting down chat session");
        }

        self.controller.shutdown();
        self.session.disconnect().await?;
        self.supervisor.abort();
        Ok(())
    }
}

impl<T: Transport> Drop for ChatSession<T> {
    fn drop(&mut self) {
        self.controller.shutdown();
        self.supervisor.abort();
        self.pump.abort();

        if !self.shut_down.swap(true, Ordering::SeqCst) {
            // Dropped without shutdown: close gracefully if a runtime is still around
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let session = self.session.clone();
                handle.spawn(async move {
                    let _ = session.disconnect().await;
                });
            }
        }
    }
}

/// Single consumer of transport events and sole writer of the message store
async fn pump_transport_events<T: Transport>(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    session: Arc<TransportSession<T>>,
    store: Arc<MessageStore>,
    client_id: String,
) {
    while let Some(event) = events.recv().await {
        match event.kind {
            TransportEventKind::MessageArrived { topic, payload } => match decode(&payload) {
                Ok(message) => {
                    let message = message.attributed_to(&client_id);
                    debug!(
                        %topic,
                        sender_id = %message.sender_id,
                        from_self = message.from_self,
                        "Chat message delivered"
                    );
                    store.append(message);
                }
                Err(e) => {
                    warn!(%topic, error = %e, "Discarding malformed chat payload");
                }
            },
            TransportEventKind::ConnectionLost { reason } => {
                session.on_connection_lost(event.connection, &reason);
            }
            TransportEventKind::DeliveryComplete { packet_id } => {
                debug!(packet_id, "Delivery complete");
            }
        }
    }

    debug!("Transport event pump stopped");
}
