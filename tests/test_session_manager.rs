//! Chat session behavior tests
//!
//! Drives `ChatSession` over the in-memory mock transport and checks what the
//! display layer observes: message order, self attribution, and the
//! offline/blank send contract.

use mqtt_chat::error::{ChatError, ErrorKind};
use mqtt_chat::protocol::{decode, encode};
use mqtt_chat::session::{ChatSession, ConnectOutcome, SendOutcome, SessionSettings};
use mqtt_chat::testing::MockTransport;
use mqtt_chat::transport::{SessionState, TransportError};
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;

const TOPIC: &str = "demo/chat/room1";
const LOCAL_ID: &str = "RustClient_local";

fn settings() -> SessionSettings {
    SessionSettings {
        client_id: LOCAL_ID.to_string(),
        topic: TOPIC.to_string(),
        qos: QoS::AtLeastOnce,
        will_message: "Usuario desconectado".to_string(),
        reconnect_delay: Duration::from_secs(5),
    }
}

async fn connected_session(mock: Arc<MockTransport>) -> ChatSession<MockTransport> {
    let chat = ChatSession::new(settings(), mock);
    assert_eq!(chat.connect().await.unwrap(), ConnectOutcome::Connected);
    chat
}

#[tokio::test]
async fn test_messages_delivered_in_arrival_order() {
    let mock = Arc::new(MockTransport::new());
    let chat = connected_session(mock.clone()).await;
    let mut feed = chat.messages();

    for (sender, text) in [("a", "M1"), ("b", "M2"), ("a", "M3")] {
        mock.inject_message(TOPIC, encode(sender, 1_700_000_000_000, text));
    }

    let mut texts = Vec::new();
    for _ in 0..3 {
        texts.push(feed.next().await.unwrap().text);
    }
    assert_eq!(texts, vec!["M1", "M2", "M3"]);
    assert_eq!(chat.snapshot().len(), 3);
}

#[tokio::test]
async fn test_concurrent_arrivals_keep_transport_order() {
    let mock = Arc::new(MockTransport::new());
    let chat = connected_session(mock.clone()).await;
    let mut feed = chat.messages();

    let injector = tokio::spawn({
        let mock = mock.clone();
        async move {
            for i in 0..50 {
                mock.inject_message(TOPIC, encode("peer", i, &format!("msg-{i}")));
                if i % 7 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }
    });

    let mut timestamps = Vec::new();
    for _ in 0..50 {
        timestamps.push(feed.next().await.unwrap().timestamp_millis);
    }
    injector.await.unwrap();

    assert_eq!(timestamps, (0..50).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_self_attribution() {
    let mock = Arc::new(MockTransport::new());
    let chat = connected_session(mock.clone()).await;
    let mut feed = chat.messages();

    mock.inject_message(TOPIC, encode(LOCAL_ID, 1, "mine"));
    mock.inject_message(TOPIC, encode("RustClient_other", 2, "theirs"));

    let mine = feed.next().await.unwrap();
    let theirs = feed.next().await.unwrap();
    assert!(mine.from_self);
    assert!(!theirs.from_self);
}

#[tokio::test]
async fn test_own_message_arrives_through_broker_echo() {
    let mock = Arc::new(MockTransport::with_echo());
    let chat = connected_session(mock.clone()).await;
    let mut feed = chat.messages();

    assert_eq!(chat.send("hola a todos").await.unwrap(), SendOutcome::Published);

    let echoed = feed.next().await.unwrap();
    assert_eq!(echoed.text, "hola a todos");
    assert_eq!(echoed.sender_id, LOCAL_ID);
    assert!(echoed.from_self);
}

#[tokio::test]
async fn test_duplicates_are_not_collapsed() {
    let mock = Arc::new(MockTransport::new());
    let chat = connected_session(mock.clone()).await;
    let mut feed = chat.messages();

    let payload = encode("peer", 42, "again");
    mock.inject_message(TOPIC, payload.clone());
    mock.inject_message(TOPIC, payload);

    let first = feed.next().await.unwrap();
    let second = feed.next().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(chat.snapshot().len(), 2);
}

#[tokio::test]
async fn test_offline_send_fails_with_not_connected() {
    let mock = Arc::new(MockTransport::new());
    let chat = ChatSession::new(settings(), mock.clone());

    let err = chat.send("hi").await.unwrap_err();

    assert!(matches!(
        err,
        ChatError::Transport(TransportError::NotConnected {
            state: SessionState::Disconnected
        })
    ));
    assert_eq!(err.kind(), ErrorKind::Publish);

    // Nothing is flushed once a connection appears
    chat.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(mock.published().is_empty());
}

#[tokio::test]
async fn test_blank_send_is_noop() {
    let mock = Arc::new(MockTransport::new());
    let chat = connected_session(mock.clone()).await;

    assert_eq!(chat.send("   ").await.unwrap(), SendOutcome::Ignored);
    assert_eq!(chat.send("\t\n").await.unwrap(), SendOutcome::Ignored);
    assert!(mock.published().is_empty());
}

#[tokio::test]
async fn test_send_stamps_current_time() {
    let mock = Arc::new(MockTransport::new());
    let chat = connected_session(mock.clone()).await;

    let before = chrono::Utc::now().timestamp_millis();
    chat.send("now").await.unwrap();
    let after = chrono::Utc::now().timestamp_millis();

    let (_, _, payload) = mock.published().pop().unwrap();
    let message = decode(&payload).unwrap();
    assert!(message.timestamp_millis >= before && message.timestamp_millis <= after);
}

#[tokio::test]
async fn test_double_connect_opens_once() {
    let mock = Arc::new(MockTransport::new());
    let gate = mock.hold_connects();
    let chat = Arc::new(ChatSession::new(settings(), mock.clone()));

    let first = tokio::spawn({
        let chat = chat.clone();
        async move { chat.connect().await }
    });
    mock.wait_for_open_calls(1).await;
    assert_eq!(chat.state(), SessionState::Connecting);

    assert_eq!(chat.connect().await.unwrap(), ConnectOutcome::AlreadyActive);

    gate.release();
    assert_eq!(first.await.unwrap().unwrap(), ConnectOutcome::Connected);
    assert_eq!(mock.open_count(), 1);
    assert_eq!(mock.subscriptions(), vec![(TOPIC.to_string(), QoS::AtLeastOnce)]);
}

#[tokio::test]
async fn test_state_changes_are_observable() {
    let mock = Arc::new(MockTransport::new());
    let chat = ChatSession::new(settings(), mock.clone());
    let mut states = chat.state_changes();
    assert_eq!(*states.borrow_and_update(), SessionState::Disconnected);

    chat.connect().await.unwrap();
    assert_eq!(*states.borrow_and_update(), SessionState::Connected);

    mock.inject_connection_lost("network drop");
    states
        .wait_for(|state| *state == SessionState::Disconnected)
        .await
        .unwrap();

    chat.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_delivery_complete_does_not_touch_store() {
    let mock = Arc::new(MockTransport::new());
    let chat = connected_session(mock.clone()).await;

    mock.inject_delivery_complete(7);
    mock.inject_message(TOPIC, encode("peer", 1, "after ack"));

    let mut feed = chat.messages();
    assert_eq!(feed.next().await.unwrap().text, "after ack");
    assert_eq!(chat.snapshot().len(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_and_blocks_reconnect() {
    let mock = Arc::new(MockTransport::new());
    let chat = connected_session(mock.clone()).await;

    chat.shutdown().await.unwrap();

    assert_eq!(chat.state(), SessionState::Disconnected);
    assert!(!mock.is_connected());
    assert_eq!(chat.connect().await.unwrap(), ConnectOutcome::Cancelled);
    assert_eq!(mock.open_count(), 1);
}
