//! Supervisor lifecycle driven by a scripted relay

mod common;

use async_trait::async_trait;
use common::MemoryWs;
use futures_util::{SinkExt, StreamExt};
use hatunnel_client::{
    BackendExecutor, ClientConfig, SessionConfig, StatusSink, Supervisor,
};
use hatunnel_transport_websocket::{RelayConnector, TransportError, TransportResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, Copy)]
enum Attempt {
    /// Connection refused
    Unreachable,
    /// HTTP error status on the upgrade
    Refused(u16),
    /// Relay reads the credential and closes
    RejectCredential,
    /// Relay accepts, stays quiet for a while, then closes
    AcceptThenClose,
}

struct ScriptedConnector {
    script: Mutex<VecDeque<Attempt>>,
    tokens: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    fn new(script: impl IntoIterator<Item = Attempt>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            tokens: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

async fn play_relay(mut relay: MemoryWs, attempt: Attempt, tokens: Arc<Mutex<Vec<String>>>) {
    if let Some(Ok(Message::Text(token))) = relay.next().await {
        tokens.lock().unwrap().push(token);
    }
    if matches!(attempt, Attempt::AcceptThenClose) {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
    let _ = relay.close(None).await;
}

#[async_trait]
impl RelayConnector for ScriptedConnector {
    type Transport = MemoryWs;

    async fn connect(&self) -> TransportResult<Self::Transport> {
        let attempt = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("script exhausted");

        match attempt {
            Attempt::Unreachable => Err(TransportError::ConnectionError(
                "connection refused".to_string(),
            )),
            Attempt::Refused(status) => Err(TransportError::Rejected(status)),
            Attempt::RejectCredential | Attempt::AcceptThenClose => {
                let (client, relay) = common::ws_pair().await;
                tokio::spawn(play_relay(relay, attempt, self.tokens.clone()));
                Ok(client)
            }
        }
    }

    fn relay_url(&self) -> &str {
        "ws://relay.test/connect"
    }
}

#[derive(Default)]
struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap())
    }
}

impl StatusSink for RecordingSink {
    fn publish(&self, status: &str) {
        self.lines.lock().unwrap().push(status.to_string());
    }
}

async fn supervisor(
    script: impl IntoIterator<Item = Attempt>,
) -> (Supervisor<ScriptedConnector>, Arc<RecordingSink>, Arc<Mutex<Vec<String>>>) {
    let backend = common::spawn_backend().await;
    let config = ClientConfig::builder()
        .api_key("secret-token")
        .subdomain("home")
        .relay_url("ws://relay.test/connect")
        .backend_url(format!("http://{}", backend))
        .session(SessionConfig {
            auth_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        })
        .build()
        .unwrap();

    let executor = Arc::new(BackendExecutor::from_config(&config).unwrap());
    let connector = ScriptedConnector::new(script);
    let tokens = connector.tokens.clone();
    let sink = Arc::new(RecordingSink::default());

    (
        Supervisor::new(config, connector, executor, sink.clone()),
        sink,
        tokens,
    )
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[tokio::test]
async fn test_backoff_doubles_and_caps() {
    let (mut sup, _sink, _tokens) = supervisor([Attempt::Unreachable; 7]).await;

    let mut delays = Vec::new();
    for _ in 0..7 {
        delays.push(sup.step().await);
    }

    assert_eq!(
        delays,
        vec![secs(5), secs(10), secs(20), secs(40), secs(60), secs(60), secs(60)]
    );
}

#[tokio::test]
async fn test_successful_auth_resets_backoff() {
    let (mut sup, sink, tokens) = supervisor([
        Attempt::Unreachable,
        Attempt::Unreachable,
        Attempt::Unreachable,
        Attempt::AcceptThenClose,
        Attempt::Unreachable,
    ])
    .await;

    assert_eq!(sup.step().await, secs(5));
    assert_eq!(sup.step().await, secs(10));
    assert_eq!(sup.step().await, secs(20));
    sink.take();

    // accepted session that later drops: backoff starts over
    assert_eq!(sup.step().await, secs(5));
    assert_eq!(
        sink.take(),
        vec![
            "Connecting to ws://relay.test/connect...",
            "Connected as home.webfork.tech",
            "Disconnected. Reconnecting...",
        ]
    );
    assert_eq!(sup.step().await, secs(10));
    assert_eq!(*tokens.lock().unwrap(), vec!["secret-token"]);
}

#[tokio::test]
async fn test_rejected_credential_keeps_backing_off() {
    let (mut sup, sink, tokens) =
        supervisor([Attempt::RejectCredential, Attempt::RejectCredential]).await;

    assert_eq!(sup.step().await, secs(5));
    assert_eq!(
        sink.take(),
        vec![
            "Connecting to ws://relay.test/connect...",
            "Authentication failed. Reconnecting...",
        ]
    );

    assert_eq!(sup.step().await, secs(10));
    assert_eq!(tokens.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_connect_failure_statuses() {
    let (mut sup, sink, _tokens) =
        supervisor([Attempt::Refused(403), Attempt::Unreachable]).await;

    sup.step().await;
    assert_eq!(
        sink.take(),
        vec![
            "Connecting to ws://relay.test/connect...",
            "Disconnected. Reconnecting...",
        ]
    );

    sup.step().await;
    assert_eq!(sink.take()[1], "Error. Reconnecting...");
    assert_eq!(sup.current_backoff(), secs(20));
}

#[tokio::test]
async fn test_each_attempt_gets_a_fresh_connection() {
    let (mut sup, _sink, tokens) = supervisor([
        Attempt::AcceptThenClose,
        Attempt::AcceptThenClose,
        Attempt::AcceptThenClose,
    ])
    .await;

    for _ in 0..3 {
        assert_eq!(sup.step().await, secs(5));
    }
    assert_eq!(tokens.lock().unwrap().len(), 3);
}
