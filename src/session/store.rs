//! Append-only message log observed by the display layer
//!
//! The log lives in a `watch` channel so any number of readers can follow it
//! while a single writer (the receive path) appends. Readers never see a
//! message reordered or removed.

use crate::protocol::ChatMessage;
use tokio::sync::watch;

/// Ordered log of delivered chat messages, newest last
#[derive(Debug)]
pub struct MessageStore {
    log: watch::Sender<Vec<ChatMessage>>,
}

impl Default for MessageStore {
    fn default() -> Self {
        let (log, _) = watch::channel(Vec::new());
        Self { log }
    }
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append in arrival order; duplicates are kept
    pub fn append(&self, message: ChatMessage) {
        self.log.send_modify(|log| log.push(message));
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.log.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.log.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.borrow().is_empty()
    }

    /// Follow the log from its first message
    pub fn feed(&self) -> MessageFeed {
        MessageFeed {
            rx: self.log.subscribe(),
            cursor: 0,
        }
    }

    /// Follow only messages appended after this call
    pub fn feed_from_now(&self) -> MessageFeed {
        let rx = self.log.subscribe();
        let cursor = rx.borrow().len();
        MessageFeed { rx, cursor }
    }
}

/// Cursor over a [`MessageStore`], yielding each message once in order
#[derive(Debug)]
pub struct MessageFeed {
    rx: watch::Receiver<Vec<ChatMessage>>,
    cursor: usize,
}

impl MessageFeed {
    /// Wait for the next message; `None` once the store is gone
    pub async fn next(&mut self) -> Option<ChatMessage> {
        loop {
            if let Some(message) = self.try_next() {
                return Some(message);
            }
            if self.rx.changed().await.is_err() {
                // Sender dropped; drain whatever is left
                return self.try_next();
            }
        }
    }

    /// Next message if one is already available
    pub fn try_next(&mut self) -> Option<ChatMessage> {
        let log = self.rx.borrow_and_update();
        let message = log.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(message)
    }

    /// Number of messages already yielded
    pub fn position(&self) -> usize {
        self.cursor
    }
}
