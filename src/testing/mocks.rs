//! Mock implementations for testing
//!
//! Provides an in-memory [`Transport`] that records what the session asks of
//! it and lets tests inject broker-side events (incoming messages, dropped
//! connections, delivery acks) without a running broker.

use crate::transport::{ConnectRequest, EventSink, SessionState, Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

pub type PublishedMessage = (String, QoS, Vec<u8>);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases connect attempts held by [`MockTransport::hold_connects`]
#[derive(Debug, Clone)]
pub struct ConnectGate {
    tx: watch::Sender<bool>,
}

impl ConnectGate {
    pub fn release(&self) {
        self.tx.send_replace(true);
    }
}

/// Mock transport for testing
#[derive(Debug)]
pub struct MockTransport {
    open_calls: watch::Sender<usize>,
    close_calls: AtomicUsize,
    failing_connects: AtomicUsize,
    fail_subscribes: AtomicBool,
    /// Broker echoes our own publishes back to subscribers, as a real one does
    echo: AtomicBool,
    next_packet_id: AtomicU16,
    connected: AtomicBool,
    gate: Mutex<Option<watch::Receiver<bool>>>,
    sink: Mutex<Option<EventSink>>,
    requests: Mutex<Vec<ConnectRequest>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    published: Mutex<Vec<PublishedMessage>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        let (open_calls, _) = watch::channel(0);
        Self {
            open_calls,
            close_calls: AtomicUsize::new(0),
            failing_connects: AtomicUsize::new(0),
            fail_subscribes: AtomicBool::new(false),
            echo: AtomicBool::new(false),
            next_packet_id: AtomicU16::new(1),
            connected: AtomicBool::new(false),
            gate: Mutex::new(None),
            sink: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock whose broker delivers our own publishes back to us
    pub fn with_echo() -> Self {
        let mock = Self::default();
        mock.echo.store(true, Ordering::SeqCst);
        mock
    }

    /// Make the next `count` calls to `open` fail with `ConnectFailed`
    pub fn fail_next_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn fail_subscribes(&self, fail: bool) {
        self.fail_subscribes.store(fail, Ordering::SeqCst);
    }

    /// Block `open` calls until the returned gate is released
    pub fn hold_connects(&self) -> ConnectGate {
        let (tx, rx) = watch::channel(false);
        *lock(&self.gate) = Some(rx);
        ConnectGate { tx }
    }

    pub fn open_count(&self) -> usize {
        *self.open_calls.borrow()
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Wait until `open` has been entered at least `count` times
    pub async fn wait_for_open_calls(&self, count: usize) {
        let mut rx = self.open_calls.subscribe();
        while *rx.borrow_and_update() < count {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn last_request(&self) -> Option<ConnectRequest> {
        lock(&self.requests).last().cloned()
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        lock(&self.subscriptions).clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    fn current_sink(&self) -> Option<EventSink> {
        lock(&self.sink).clone()
    }

    /// Deliver a message on the most recently opened connection
    pub fn inject_message(&self, topic: &str, payload: impl Into<Bytes>) {
        if let Some(sink) = self.current_sink() {
            sink.message_arrived(topic.to_string(), payload.into());
        }
    }

    /// Drop the most recently opened connection
    pub fn inject_connection_lost(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(sink) = self.current_sink() {
            sink.connection_lost(reason);
        }
    }

    pub fn inject_delivery_complete(&self, packet_id: u16) {
        if let Some(sink) = self.current_sink() {
            sink.delivery_complete(packet_id);
        }
    }

    async fn wait_for_gate(&self) {
        let gate = lock(&self.gate).clone();
        if let Some(mut rx) = gate {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    fn not_connected() -> TransportError {
        TransportError::NotConnected {
            state: SessionState::Disconnected,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, request: ConnectRequest, events: EventSink) -> Result<(), TransportError> {
        lock(&self.requests).push(request);
        self.open_calls.send_modify(|count| *count += 1);

        self.wait_for_gate().await;

        let should_fail = self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(TransportError::ConnectFailed(
                "mock broker refused connection".to_string(),
            ));
        }

        *lock(&self.sink) = Some(events);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(Self::not_connected());
        }
        if self.fail_subscribes.load(Ordering::SeqCst) {
            return Err(TransportError::SubscriptionFailed(
                "mock broker rejected subscription".into(),
            ));
        }
        lock(&self.subscriptions).push((topic.to_string(), qos));
        Ok(())
    }

    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(Self::not_connected());
        }

        lock(&self.published).push((topic.to_string(), qos, payload.clone()));

        if let Some(sink) = self.current_sink() {
            let subscribed = lock(&self.subscriptions).iter().any(|(t, _)| t == topic);
            if self.echo.load(Ordering::SeqCst) && subscribed {
                sink.message_arrived(topic.to_string(), Bytes::from(payload));
            }
            if qos != QoS::AtMostOnce {
                sink.delivery_complete(self.next_packet_id.fetch_add(1, Ordering::SeqCst));
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.sink).take();
        Ok(())
    }
}
