//! Impure I/O operations for the MQTT transport
//!
//! This module owns the rumqttc client and the task that polls its event
//! loop. Each `open` creates a fresh client/event-loop pair; when the event
//! loop reports an error the task reports the loss and exits without polling
//! again, which is what keeps rumqttc from reconnecting on its own.

use super::connection::{configure_mqtt_options, SessionState, TransportError};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::ChatConfig;
use crate::transport::{ConnectRequest, EventSink, Transport};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, NetworkOptions, QoS};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Request queue depth between the client handle and its event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long `close` waits for the event loop to flush DISCONNECT
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// MQTT transport for the chat session
pub struct MqttClient {
    client_id: String,
    config: ChatConfig,
    active: Mutex<Option<ActiveConnection>>,
}

struct ActiveConnection {
    client: AsyncClient,
    event_loop_handle: JoinHandle<()>,
}

impl MqttClient {
    pub fn new(client_id: impl Into<String>, config: ChatConfig) -> Self {
        Self {
            client_id: client_id.into(),
            config,
            active: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Wait for the event loop task to confirm ConnAck, with timeout
    async fn wait_for_connection_confirmation(
        ready_rx: oneshot::Receiver<Result<(), String>>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(TransportError::ConnectFailed(reason)),
            Ok(Err(_)) => Err(TransportError::ConnectFailed(
                "event loop stopped before ConnAck".to_string(),
            )),
            Err(_) => Err(TransportError::ConnectTimeout(timeout)),
        }
    }

    /// Poll the event loop until the connection ends
    ///
    /// Before ConnAck, failures are reported through `ready_tx`; afterwards
    /// through the sink as a connection loss. Either way the loop is never
    /// polled again after an error.
    async fn run_event_loop(
        mut event_loop: EventLoop,
        events: EventSink,
        ready_tx: oneshot::Sender<Result<(), String>>,
    ) {
        let mut ready_tx = Some(ready_tx);

        loop {
            match event_loop.poll().await {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged => {
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(Ok(()));
                        }
                    }
                    EventRoute::MessageReceived {
                        topic,
                        payload,
                        retain,
                    } => {
                        debug!(target: "mqtt_transport", %topic, retain, bytes = payload.len(), "Received MQTT message");
                        events.message_arrived(topic, payload);
                    }
                    EventRoute::DeliveryComplete { packet_id } => {
                        events.delivery_complete(packet_id);
                    }
                    EventRoute::SubscriptionConfirmed {
                        packet_id,
                        rejected,
                    } => {
                        if rejected {
                            warn!(packet_id, "Broker refused chat topic subscription");
                        } else {
                            debug!(target: "mqtt_transport", packet_id, "Subscription confirmed");
                        }
                    }
                    EventRoute::BrokerDisconnected => {
                        events.connection_lost("broker closed the connection");
                        break;
                    }
                    EventRoute::DisconnectSent => {
                        debug!(target: "mqtt_transport", "DISCONNECT sent, stopping event loop");
                        break;
                    }
                    EventRoute::InfrastructureEvent(event_str) => {
                        debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                    }
                    EventRoute::OutgoingEvent => {}
                },
                Err(e) => {
                    match ready_tx.take() {
                        Some(tx) => {
                            let _ = tx.send(Err(e.to_string()));
                        }
                        None => {
                            error!(connection = events.connection(), "MQTT event loop error: {}", e);
                            events.connection_lost(e.to_string());
                        }
                    }
                    break;
                }
            }
        }

        debug!(target: "mqtt_transport", connection = events.connection(), "MQTT event loop stopped");
    }

    async fn connected_client(&self) -> Result<AsyncClient, TransportError> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .filter(|conn| !conn.event_loop_handle.is_finished())
            .map(|conn| conn.client.clone())
            .ok_or(TransportError::NotConnected {
                state: SessionState::Disconnected,
            })
    }
}

#[async_trait]
impl Transport for MqttClient {
    async fn open(&self, request: ConnectRequest, events: EventSink) -> Result<(), TransportError> {
        let mut active = self.active.lock().await;

        // A previous connection that died on its own still holds a handle
        if let Some(stale) = active.take() {
            stale.event_loop_handle.abort();
        }

        let mqtt_options = configure_mqtt_options(&self.client_id, &self.config, &request.will)?;
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        // rumqttc otherwise gives up on TCP/TLS/CONNECT after its own 5s default
        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(self.config.broker.connection_timeout_secs);
        event_loop.set_network_options(network_options);

        let (ready_tx, ready_rx) = oneshot::channel();
        let connection = events.connection();
        let handle = tokio::spawn(Self::run_event_loop(event_loop, events, ready_tx));

        info!(
            client_id = %self.client_id,
            broker = %self.config.broker.url,
            connection,
            "Connecting to MQTT broker"
        );

        match Self::wait_for_connection_confirmation(ready_rx, self.config.connection_timeout())
            .await
        {
            Ok(()) => {
                *active = Some(ActiveConnection {
                    client,
                    event_loop_handle: handle,
                });
                info!(client_id = %self.client_id, connection, "MQTT connection established");
                Ok(())
            }
            Err(e) => {
                handle.abort();
                Err(e)
            }
        }
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let client = self.connected_client().await?;
        client
            .subscribe(topic, qos)
            .await
            .map_err(|e| TransportError::SubscriptionFailed(Box::new(e)))?;
        info!(%topic, ?qos, "Subscribed to chat topic");
        Ok(())
    }

    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), TransportError> {
        let client = self.connected_client().await?;
        client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(Box::new(e)))?;
        debug!(target: "mqtt_transport", %topic, "Published chat message");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let Some(connection) = self.active.lock().await.take() else {
            return Ok(());
        };

        let request_result = if connection.event_loop_handle.is_finished() {
            Ok(())
        } else {
            connection.client.disconnect().await
        };

        // Give the event loop time to flush DISCONNECT and stop on its own
        let mut handle = connection.event_loop_handle;
        match tokio::time::timeout(CLOSE_GRACE, &mut handle).await {
            Ok(Ok(())) => debug!(target: "mqtt_transport", "Event loop task shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
            Err(_) => {
                warn!("Event loop task didn't shut down gracefully, forcing abort");
                handle.abort();
            }
            _ => {}
        }

        request_result.map_err(|e| TransportError::CloseFailed(Box::new(e)))?;
        info!(client_id = %self.client_id, "MQTT client disconnected");
        Ok(())
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // Dropping the event loop closes the socket; no async work possible here
        if let Some(connection) = self.active.get_mut().take() {
            connection.event_loop_handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportEventKind, WillMessage};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn test_request() -> ConnectRequest {
        ConnectRequest {
            will: WillMessage {
                topic: "demo/chat/room1".to_string(),
                payload: b"me|1|Usuario desconectado".to_vec(),
                qos: QoS::AtLeastOnce,
            },
        }
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(Ok(()));
        });

        let result = MqttClient::wait_for_connection_confirmation(rx, Duration::from_millis(500)).await;
        assert!(result.is_ok(), "Should successfully wait for connection");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_refused() {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err("Connection refused".to_string()));

        let result = MqttClient::wait_for_connection_confirmation(rx, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(ref r)) if r.contains("refused")));
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let (_tx, rx) = oneshot::channel::<Result<(), String>>();

        let result = MqttClient::wait_for_connection_confirmation(rx, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(TransportError::ConnectTimeout(_))));
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_task_gone() {
        let (tx, rx) = oneshot::channel::<Result<(), String>>();
        drop(tx);

        let result = MqttClient::wait_for_connection_confirmation(rx, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn test_publish_fails_without_connection() {
        let client = MqttClient::new("test-client", ChatConfig::test_config());
        let result = client
            .publish("demo/chat/room1", QoS::AtLeastOnce, b"a|1|b".to_vec())
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_subscribe_fails_without_connection() {
        let client = MqttClient::new("test-client", ChatConfig::test_config());
        let result = client.subscribe("demo/chat/room1", QoS::AtLeastOnce).await;
        assert!(matches!(result, Err(TransportError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_close_without_connection_is_noop() {
        let client = MqttClient::new("test-client", ChatConfig::test_config());
        assert!(client.close().await.is_ok());
        assert!(client.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_open_with_unreadable_ca_fails_without_network() {
        let mut config = ChatConfig::test_config();
        config.broker.url = "ssl://localhost:8883".to_string();
        config.broker.ca_cert = Some("/nonexistent/ca.crt".into());
        let client = MqttClient::new("test-client", config);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = client.open(test_request(), EventSink::new(1, tx)).await;

        assert!(matches!(result, Err(TransportError::Trust(_))));
        assert!(rx.try_recv().is_err(), "No events for a connection that never opened");
    }

    #[tokio::test]
    async fn test_open_against_closed_port_fails() {
        let mut config = ChatConfig::test_config();
        // Port 1 is essentially never listening
        config.broker.url = "mqtt://127.0.0.1:1".to_string();
        config.broker.connection_timeout_secs = 5;
        let client = MqttClient::new("test-client", config);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = client.open(test_request(), EventSink::new(1, tx)).await;

        assert!(result.is_err(), "Connecting to a closed port should fail");
        assert!(result.unwrap_err().is_connect_failure());
        // Handshake failures are returned, not reported as connection loss
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event.kind, TransportEventKind::ConnectionLost { .. }));
        }
    }

    #[tokio::test]
    async fn test_open_honors_configured_timeout_beyond_rumqttc_default() {
        // Accepts TCP but never answers CONNECT
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent_broker = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut config = ChatConfig::test_config();
        config.broker.url = format!("mqtt://{addr}");
        config.broker.connection_timeout_secs = 7;
        let client = MqttClient::new("test-client", config);

        let (tx, _rx) = mpsc::unbounded_channel();
        let started = Instant::now();
        let result = client.open(test_request(), EventSink::new(1, tx)).await;
        let elapsed = started.elapsed();

        assert!(result.unwrap_err().is_connect_failure());
        assert!(
            elapsed >= Duration::from_secs(6),
            "Attempt gave up after {elapsed:?}, before the configured 7s"
        );
        assert!(elapsed < Duration::from_secs(12), "Attempt overran: {elapsed:?}");
        silent_broker.abort();
    }
}
