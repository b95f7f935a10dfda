//! Reconnection controller
//!
//! Watches the transport session's events and, after a connection loss or a
//! failed attempt, waits a fixed delay and connects again. There is no attempt
//! limit and no backoff; retries continue until shutdown.

use super::transport_session::{ConnectOutcome, SessionEvent, TransportSession};
use crate::transport::Transport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Delay between a connection loss and the next attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// What the controller does when a retry timer fires (pure function)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Start a new connect attempt
    Proceed,
    /// Shutdown was requested while waiting
    AbortShutdownRequested,
    /// A connect happened meanwhile; nothing to do
    SkipAlreadyActive,
}

impl RetryDecision {
    pub fn evaluate(shutdown_requested: bool, session_active: bool) -> Self {
        if shutdown_requested {
            RetryDecision::AbortShutdownRequested
        } else if session_active {
            RetryDecision::SkipAlreadyActive
        } else {
            RetryDecision::Proceed
        }
    }
}

/// Drives the transport session back to `Connected` after failures
pub struct ReconnectionController<T: Transport> {
    session: Arc<TransportSession<T>>,
    delay: Duration,
    shutdown_tx: watch::Sender<bool>,
    /// Retry waiting on its timer; at most one at a time
    pending: Mutex<Option<JoinHandle<()>>>,
    /// Consecutive retries since the last successful one
    attempts: AtomicU64,
}

impl<T: Transport> ReconnectionController<T> {
    pub fn new(session: Arc<TransportSession<T>>, delay: Duration) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            session,
            delay,
            shutdown_tx,
            pending: Mutex::new(None),
            attempts: AtomicU64::new(0),
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Spawn the task that listens for session events
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let events = self.session.subscribe_events();
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(controller.supervise(events, shutdown_rx))
    }

    async fn supervise(
        self: Arc<Self>,
        mut events: broadcast::Receiver<SessionEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!("Reconnection supervisor stopping");
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(SessionEvent::ConnectionLost { reason })
                    | Ok(SessionEvent::ConnectFailed { reason }) => {
                        self.schedule_retry(&reason);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Reconnection supervisor lagged behind session events");
                        if !self.session.state().is_active() {
                            self.schedule_retry("missed session events");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Schedule a retry after the fixed delay, unless one is already pending
    pub fn schedule_retry(self: &Arc<Self>, reason: &str) {
        if self.is_shutdown() {
            debug!(%reason, "Shutdown requested, not scheduling reconnection");
            return;
        }

        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        if pending.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!(%reason, "Reconnection already pending");
            return;
        }

        info!(%reason, delay_secs = self.delay.as_secs_f64(), "Scheduling reconnection");
        let controller = Arc::clone(self);
        *pending = Some(tokio::spawn(controller.retry_after_delay()));
    }

    async fn retry_after_delay(self: Arc<Self>) {
        let shutdown_rx = self.shutdown_tx.subscribe();
        if !interruptible_sleep(shutdown_rx, self.delay).await {
            return;
        }

        // From here on the timer is spent; failures below schedule a fresh one
        if let Ok(mut pending) = self.pending.lock() {
            pending.take();
        }

        match RetryDecision::evaluate(self.is_shutdown(), self.session.state().is_active()) {
            RetryDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, aborting reconnection");
                return;
            }
            RetryDecision::SkipAlreadyActive => {
                debug!(state = %self.session.state(), "Session already active, skipping reconnection");
                return;
            }
            RetryDecision::Proceed => {}
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let span = crate::reconnect_span!(attempt);
        self.attempt_reconnect().instrument(span).await;
    }

    async fn attempt_reconnect(&self) {
        info!("Attempting reconnection");
        match self.session.connect().await {
            Ok(ConnectOutcome::Connected) => {
                if self.is_shutdown() {
                    // Shutdown raced the attempt; close what it opened
                    let _ = self.session.disconnect().await;
                } else {
                    self.attempts.store(0, Ordering::SeqCst);
                    info!("Reconnection successful");
                }
            }
            Ok(outcome) => debug!(?outcome, "Reconnection attempt was a no-op"),
            Err(e) => warn!(error = %e, "Reconnection attempt failed"),
        }
    }

    /// Stop scheduling retries and cancel a pending one
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(handle) = pending.take() {
                handle.abort();
            }
        }
        debug!("Reconnection controller shut down");
    }
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown_rx.borrow_and_update() {
        return false;
    }

    tokio::select! {
        changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
                info!("Shutdown signal received during reconnection delay, stopping");
                return false;
            }
            true
        }
        _ = tokio::time::sleep(delay) => true,
    }
}
