//! Transport session state machine
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected`. The session is
//! the only owner of [`SessionState`]; everything else observes it. It never
//! schedules retries itself. Failed attempts and lost connections are
//! announced as [`SessionEvent`]s and the reconnection controller decides.

use crate::protocol::{encode, now_millis};
use crate::transport::{
    ConnectRequest, EventSink, WillMessage, SessionState, Transport, TransportError,
    TransportEvent,
};
use rumqttc::QoS;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{debug, info, warn};

/// Capacity of the session event broadcast
const SESSION_EVENT_CAPACITY: usize = 16;

/// Static parameters of the transport session
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub client_id: String,
    pub topic: String,
    pub qos: QoS,
    /// Body of the last-will departure notice
    pub will_message: String,
}

/// State-machine notifications for observers such as the reconnection controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// `Connected -> Disconnected`, emitted exactly once per transition
    ConnectionLost { reason: String },
    /// `Connecting -> Disconnected` after a failed attempt
    ConnectFailed { reason: String },
}

/// What a call to [`TransportSession::connect`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new connection was established
    Connected,
    /// Another attempt was in flight or the session was already connected
    AlreadyActive,
    /// A disconnect overtook the attempt before it started
    Cancelled,
}

/// Owns the broker connection and its state
pub struct TransportSession<T: Transport> {
    transport: Arc<T>,
    settings: TransportSettings,
    state_tx: watch::Sender<SessionState>,
    session_events: broadcast::Sender<SessionEvent>,
    transport_events: mpsc::UnboundedSender<TransportEvent>,
    /// Serializes open/close against each other
    io_lock: Mutex<()>,
    /// Sequence number of the latest connection attempt
    current_connection: AtomicU64,
    /// Connection most recently reported lost by the transport
    lost_connection: AtomicU64,
}

impl<T: Transport> TransportSession<T> {
    /// Create a session; transport events are delivered to `transport_events`
    pub fn new(
        transport: Arc<T>,
        settings: TransportSettings,
        transport_events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (session_events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);

        Self {
            transport,
            settings,
            state_tx,
            session_events,
            transport_events,
            io_lock: Mutex::new(()),
            current_connection: AtomicU64::new(0),
            lost_connection: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_events.subscribe()
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Atomically claim `Disconnected -> Connecting`
    fn claim_connecting(&self) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Disconnected {
                *state = SessionState::Connecting;
                true
            } else {
                false
            }
        })
    }

    /// Last will for this attempt: a departure notice stamped now
    fn last_will(&self) -> WillMessage {
        WillMessage {
            topic: self.settings.topic.clone(),
            payload: encode(
                &self.settings.client_id,
                now_millis(),
                &self.settings.will_message,
            ),
            qos: self.settings.qos,
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine: nobody is supervising this session
        let _ = self.session_events.send(event);
    }

    /// Start a connection attempt unless one is active
    ///
    /// At most one attempt is in flight; calls made while `Connecting` or
    /// `Connected` return [`ConnectOutcome::AlreadyActive`] without touching
    /// the transport. After the handshake the chat topic is subscribed; a
    /// subscribe failure is logged and the connection is kept.
    pub async fn connect(&self) -> Result<ConnectOutcome, TransportError> {
        if !self.claim_connecting() {
            debug!(state = %self.state(), "Connect requested while active, ignoring");
            return Ok(ConnectOutcome::AlreadyActive);
        }

        let _io = self.io_lock.lock().await;

        if self.state() != SessionState::Connecting {
            debug!("Connect attempt cancelled by disconnect before it started");
            return Ok(ConnectOutcome::Cancelled);
        }

        let connection = self.current_connection.fetch_add(1, Ordering::SeqCst) + 1;
        let sink = EventSink::new(connection, self.transport_events.clone());
        let request = ConnectRequest {
            will: self.last_will(),
        };

        info!(
            client_id = %self.settings.client_id,
            connection,
            "Connect attempt started"
        );

        if let Err(e) = self.transport.open(request, sink).await {
            self.state_tx.send_replace(SessionState::Disconnected);
            warn!(connection, error = %e, "Connect attempt failed");
            self.emit(SessionEvent::ConnectFailed {
                reason: e.to_string(),
            });
            return Err(e);
        }

        // The transport may already have reported this connection lost
        let mut lost_during_handshake = false;
        self.state_tx.send_modify(|state| {
            if self.lost_connection.load(Ordering::SeqCst) == connection {
                lost_during_handshake = true;
                *state = SessionState::Disconnected;
            } else {
                *state = SessionState::Connected;
            }
        });

        if lost_during_handshake {
            let reason = "connection lost during handshake".to_string();
            warn!(connection, "{}", reason);
            self.emit(SessionEvent::ConnectFailed {
                reason: reason.clone(),
            });
            return Err(TransportError::ConnectFailed(reason));
        }

        info!(client_id = %self.settings.client_id, connection, "Session connected");

        if let Err(e) = self
            .transport
            .subscribe(&self.settings.topic, self.settings.qos)
            .await
        {
            warn!(
                topic = %self.settings.topic,
                error = %e,
                "Subscribe failed, keeping connection"
            );
        }

        Ok(ConnectOutcome::Connected)
    }

    /// Handle a connection-lost report from the transport
    ///
    /// Returns true when this caused the `Connected -> Disconnected`
    /// transition. Reports for superseded connections are ignored.
    pub fn on_connection_lost(&self, connection: u64, reason: &str) -> bool {
        let transitioned = self.state_tx.send_if_modified(|state| {
            if connection != self.current_connection.load(Ordering::SeqCst) {
                return false;
            }
            self.lost_connection.store(connection, Ordering::SeqCst);
            if *state == SessionState::Connected {
                *state = SessionState::Disconnected;
                true
            } else {
                false
            }
        });

        if transitioned {
            warn!(connection, %reason, "Connection lost");
            self.emit(SessionEvent::ConnectionLost {
                reason: reason.to_string(),
            });
        } else {
            debug!(connection, %reason, "Ignoring loss report for inactive connection");
        }

        transitioned
    }

    /// Publish an encoded payload on the chat topic
    ///
    /// Fails with `NotConnected` unless the session is `Connected`. Nothing
    /// is queued for later.
    pub async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let state = self.state();
        if state != SessionState::Connected {
            return Err(TransportError::NotConnected { state });
        }

        self.transport
            .publish(&self.settings.topic, self.settings.qos, payload)
            .await
    }

    /// Close the connection; idempotent
    ///
    /// Waits for an in-flight attempt to finish first, then closes whatever
    /// it opened.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        let _io = self.io_lock.lock().await;

        // Late events from the closing connection must not be attributed to it
        self.current_connection.fetch_add(1, Ordering::SeqCst);
        let previous = self.state_tx.send_replace(SessionState::Disconnected);

        let result = self.transport.close().await;

        if previous == SessionState::Connected {
            info!(client_id = %self.settings.client_id, "Session disconnected");
            self.emit(SessionEvent::ConnectionLost {
                reason: "disconnected by client".to_string(),
            });
        }

        result
    }
}
