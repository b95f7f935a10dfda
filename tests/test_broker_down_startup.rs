//! Integration tests for a chat session started while the broker is down
//!
//! Uses the real rumqttc transport against addresses nothing listens on:
//! - the first connect fails as a transport error, never a panic or exit
//! - the reconnection controller keeps retrying on its fixed delay
//! - sends while down fail with NotConnected
//! - an unusable CA fails each attempt as a trust error and is retried too

use mqtt_chat::error::{ChatError, ErrorKind};
use mqtt_chat::session::{ChatSession, SessionEvent};
use mqtt_chat::transport::{SessionState, TransportError};
use mqtt_chat::ChatConfig;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::broadcast;
use tokio::time::timeout;

fn unreachable_broker_config() -> ChatConfig {
    ChatConfig::from_toml_str(
        r#"
[broker]
url = "mqtt://127.0.0.1:1"
topic = "demo/chat/room1"
connection_timeout_secs = 2

[reconnect]
delay_secs = 1
"#,
    )
    .expect("config should parse")
}

async fn next_connect_failure(events: &mut broadcast::Receiver<SessionEvent>) -> String {
    loop {
        match events.recv().await {
            Ok(SessionEvent::ConnectFailed { reason }) => return reason,
            Ok(_) => continue,
            Err(e) => panic!("session events closed: {e}"),
        }
    }
}

#[tokio::test]
async fn test_first_connect_fails_without_exiting() {
    let chat = ChatSession::from_config(&unreachable_broker_config()).unwrap();

    let err = chat.connect().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransportConnect);
    assert!(err.is_recoverable());
    assert_eq!(chat.state(), SessionState::Disconnected);
    chat.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_controller_keeps_retrying_while_broker_down() {
    let chat = ChatSession::from_config(&unreachable_broker_config()).unwrap();
    let mut events = chat.connection_events();

    let _ = chat.connect().await;
    next_connect_failure(&mut events).await;

    // Two more attempts, each a delay apart
    for _ in 0..2 {
        let retried = timeout(Duration::from_secs(6), next_connect_failure(&mut events)).await;
        assert!(retried.is_ok(), "Controller should retry after its delay");
    }

    chat.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_send_while_broker_down_is_not_connected() {
    let chat = ChatSession::from_config(&unreachable_broker_config()).unwrap();
    let _ = chat.connect().await;

    let err = chat.send("is anyone there?").await.unwrap_err();
    assert!(matches!(
        err,
        ChatError::Transport(TransportError::NotConnected { .. })
    ));

    chat.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unusable_ca_fails_attempt_and_is_retried() {
    let mut ca = NamedTempFile::new().unwrap();
    writeln!(ca, "this is not a certificate").unwrap();

    let config = ChatConfig::from_toml_str(&format!(
        r#"
[broker]
url = "ssl://127.0.0.1:1"
topic = "demo/chat/room1"
ca_cert = "{}"

[reconnect]
delay_secs = 1
"#,
        ca.path().display()
    ))
    .unwrap();

    let chat = ChatSession::from_config(&config).unwrap();
    let mut events = chat.connection_events();

    let err = chat.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TrustBuild);
    next_connect_failure(&mut events).await;

    let retried = timeout(Duration::from_secs(6), next_connect_failure(&mut events)).await;
    assert!(retried.is_ok(), "Trust failures go through the same retry loop");

    chat.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_retries() {
    let chat = ChatSession::from_config(&unreachable_broker_config()).unwrap();
    let mut events = chat.connection_events();

    let _ = chat.connect().await;
    next_connect_failure(&mut events).await;
    chat.shutdown().await.unwrap();

    let retried = timeout(Duration::from_secs(3), next_connect_failure(&mut events)).await;
    assert!(retried.is_err(), "No attempts after shutdown");
    assert_eq!(chat.state(), SessionState::Disconnected);
}
