//! Connection session
//!
//! A session owns exactly one relay connection from the credential handshake until
//! the connection dies. It is never reused: the supervisor builds a new one for
//! every connection attempt.
//!
//! Reads happen on the session loop only. Each request frame runs on its own task
//! and posts the encoded response to a queue drained by a single writer task, so
//! responses never interleave on the wire while execution stays fully concurrent.

use crate::config::SessionConfig;
use crate::executor::BackendExecutor;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use hatunnel_proto::{EnvelopeCodec, ResponseEnvelope};
use hatunnel_transport_websocket::{Message, MessageTransport};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminationReason {
    #[error("authentication failed: relay closed the connection during the handshake")]
    AuthFailed,

    #[error("connection closed by relay")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("keepalive timeout: relay stopped answering pings")]
    KeepaliveTimeout,
}

/// Outcome of the timed wait that follows sending the credential
///
/// The relay never acknowledges a good credential; it only closes the connection
/// on a bad one. Silence for the whole window therefore means success.
#[derive(Debug)]
pub enum AuthWait {
    /// Nothing arrived before the deadline: accepted
    TimedOut,
    /// Connection closed or failed before the deadline: rejected
    Closed,
    /// A request frame (one carrying a request id) arrived before the deadline.
    /// The relay only sends requests to accepted clients, so this counts as
    /// acceptance and the frame is served as the first request.
    Received(Message),
}

/// A connected but not yet authenticated session
pub struct Session<T> {
    transport: T,
    config: SessionConfig,
    executor: Arc<BackendExecutor>,
    session_id: String,
}

impl<T: MessageTransport> Session<T> {
    pub fn new(transport: T, config: SessionConfig, executor: Arc<BackendExecutor>) -> Self {
        let session_id = format!("ws-{}", uuid::Uuid::new_v4().simple());
        Self {
            transport,
            config,
            executor,
            session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Authenticate, then serve until the connection ends
    pub async fn run(self, token: &str) -> TerminationReason {
        match self.authenticate(token).await {
            Ok(session) => session.serve().await,
            Err(reason) => reason,
        }
    }

    /// Send the credential and wait out the rejection window
    pub async fn authenticate(
        mut self,
        token: &str,
    ) -> Result<AuthenticatedSession<T>, TerminationReason> {
        debug!("[{}] Sending credential", self.session_id);

        if let Err(e) = self.transport.send(Message::Text(token.to_string())).await {
            error!("[{}] Failed to send credential: {}", self.session_id, e);
            return Err(TerminationReason::Transport(e.to_string()));
        }

        let first_frame = match self.wait_for_rejection().await {
            AuthWait::TimedOut => {
                info!(
                    "[{}] Authentication successful. Listening for requests...",
                    self.session_id
                );
                None
            }
            AuthWait::Received(frame) => {
                info!(
                    "[{}] Relay sent a request during the authentication window, treating credential as accepted",
                    self.session_id
                );
                Some(frame)
            }
            AuthWait::Closed => {
                warn!(
                    "[{}] Relay closed the connection during authentication",
                    self.session_id
                );
                return Err(TerminationReason::AuthFailed);
            }
        };

        Ok(AuthenticatedSession {
            transport: self.transport,
            config: self.config,
            executor: self.executor,
            session_id: self.session_id,
            first_frame,
        })
    }

    async fn wait_for_rejection(&mut self) -> AuthWait {
        let deadline = Instant::now() + self.config.auth_timeout;

        loop {
            let next = match tokio::time::timeout_at(deadline, self.transport.next()).await {
                Ok(next) => next,
                Err(_) => return AuthWait::TimedOut,
            };

            match next {
                Some(Ok(Message::Close(frame))) => {
                    debug!("[{}] Close frame during auth: {:?}", self.session_id, frame);
                    return AuthWait::Closed;
                }
                // Control traffic neither accepts nor rejects; keep waiting
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(frame)) => {
                    if carries_request_id(&frame) {
                        return AuthWait::Received(frame);
                    }
                    // e.g. a plain-text rejection notice ahead of the close
                    debug!(
                        "[{}] Ignoring non-request frame during auth: {:?}",
                        self.session_id, frame
                    );
                }
                Some(Err(e)) => {
                    debug!("[{}] Read error during auth: {}", self.session_id, e);
                    return AuthWait::Closed;
                }
                None => return AuthWait::Closed,
            }
        }
    }
}

fn carries_request_id(frame: &Message) -> bool {
    match frame {
        Message::Text(text) => EnvelopeCodec::recover_id(text.as_bytes()).is_some(),
        Message::Binary(data) => EnvelopeCodec::recover_id(data).is_some(),
        _ => false,
    }
}

/// A session whose credential the relay accepted
pub struct AuthenticatedSession<T> {
    transport: T,
    config: SessionConfig,
    executor: Arc<BackendExecutor>,
    session_id: String,
    first_frame: Option<Message>,
}

impl<T: MessageTransport> AuthenticatedSession<T> {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Read frames until the connection ends, serving each one concurrently
    pub async fn serve(self) -> TerminationReason {
        let AuthenticatedSession {
            transport,
            config,
            executor,
            session_id,
            first_frame,
        } = self;

        let (sink, mut stream) = transport.split();
        let (out_tx, out_rx) = mpsc::channel::<Message>(config.outbound_queue);

        let mut writer = tokio::spawn(writer_task(sink, out_rx, session_id.clone()));

        let dispatcher = Dispatcher {
            executor,
            out_tx: out_tx.clone(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            session_id: session_id.clone(),
        };
        let mut keepalive = Keepalive::new(&config);

        if let Some(frame) = first_frame {
            dispatcher.on_data(frame);
        }

        let reason = loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => dispatcher.dispatch(text.into_bytes()),
                    Some(Ok(Message::Binary(data))) => dispatcher.dispatch(data),
                    Some(Ok(Message::Pong(_))) => keepalive.on_pong(),
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite queues the pong itself
                        trace!("[{}] Received ping", session_id);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("[{}] WebSocket close received: {:?}", session_id, frame);
                        break TerminationReason::Closed;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        error!("[{}] WebSocket read error: {}", session_id, e);
                        break TerminationReason::Transport(e.to_string());
                    }
                    None => {
                        debug!("[{}] WebSocket stream ended", session_id);
                        break TerminationReason::Closed;
                    }
                },
                _ = keepalive.tick() => {
                    if keepalive.expired() {
                        warn!("[{}] No pong from relay, closing session", session_id);
                        break TerminationReason::KeepaliveTimeout;
                    }
                    if keepalive.should_ping() {
                        match out_tx.try_send(Message::Ping(Vec::new())) {
                            Ok(()) => keepalive.on_ping(),
                            Err(e) => debug!("[{}] Skipping keepalive ping: {}", session_id, e),
                        }
                    }
                }
                _ = &mut writer => {
                    break TerminationReason::Transport("WebSocket writer stopped".to_string());
                }
            }
        };

        // Requests still running finish on their own; their responses go nowhere.
        writer.abort();
        let abandoned = dispatcher.in_flight.lock().await.len();
        if abandoned > 0 {
            warn!(
                "[{}] Session ended with {} request(s) in flight",
                session_id, abandoned
            );
        }
        info!("[{}] Session ended: {}", session_id, reason);

        reason
    }
}

struct Dispatcher {
    executor: Arc<BackendExecutor>,
    out_tx: mpsc::Sender<Message>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl Dispatcher {
    fn on_data(&self, frame: Message) {
        match frame {
            Message::Text(text) => self.dispatch(text.into_bytes()),
            Message::Binary(data) => self.dispatch(data),
            other => trace!("[{}] Ignoring non-data frame {:?}", self.session_id, other),
        }
    }

    /// Serve one request frame on its own task
    fn dispatch(&self, frame: Vec<u8>) {
        let executor = self.executor.clone();
        let out_tx = self.out_tx.clone();
        let in_flight = self.in_flight.clone();
        let session_id = self.session_id.clone();

        tokio::spawn(async move {
            let (id, response) = match EnvelopeCodec::decode_request(&frame) {
                Ok(request) => {
                    if !in_flight.lock().await.insert(request.id.clone()) {
                        warn!(
                            "[{}] Request id {} is already in flight",
                            session_id, request.id
                        );
                    }
                    let response = executor.execute(&request).await;
                    (Some(request.id), response)
                }
                Err(e) => match BackendExecutor::reject_frame(&frame, &e) {
                    Some(response) => (None, response),
                    None => return,
                },
            };

            let encoded = EnvelopeCodec::encode_response(&response).or_else(|e| {
                error!(
                    "[{}] Failed to encode response {}: {}",
                    session_id, response.id, e
                );
                EnvelopeCodec::encode_response(&ResponseEnvelope::failure(
                    &response.id,
                    format!("Tunnel client error: {}", e),
                ))
            });

            match encoded {
                Ok(text) => {
                    if out_tx.send(Message::Text(text)).await.is_err() {
                        debug!(
                            "[{}] Connection gone, dropping response {}",
                            session_id, response.id
                        );
                    }
                }
                Err(e) => error!(
                    "[{}] Failed to encode failure response {}: {}",
                    session_id, response.id, e
                ),
            }

            if let Some(id) = id {
                in_flight.lock().await.remove(&id);
            }
        });
    }
}

/// Writer task - the only place that writes to the connection
async fn writer_task<T: MessageTransport>(
    mut sink: SplitSink<T, Message>,
    mut rx: mpsc::Receiver<Message>,
    session_id: String,
) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.send(message).await {
            error!("[{}] WebSocket send error: {}", session_id, e);
            break;
        }
    }

    debug!("[{}] WebSocket writer task ended", session_id);
    let _ = sink.close().await;
}

struct Keepalive {
    ticker: Option<Interval>,
    timeout: std::time::Duration,
    awaiting_pong_since: Option<Instant>,
}

impl Keepalive {
    fn new(config: &SessionConfig) -> Self {
        let ticker = (!config.keepalive_interval.is_zero()).then(|| {
            let period = config.keepalive_interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        Self {
            ticker,
            timeout: config.keepalive_timeout,
            awaiting_pong_since: None,
        }
    }

    async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    fn should_ping(&self) -> bool {
        self.awaiting_pong_since.is_none()
    }

    fn on_ping(&mut self) {
        self.awaiting_pong_since = Some(Instant::now());
    }

    fn on_pong(&mut self) {
        self.awaiting_pong_since = None;
    }

    fn expired(&self) -> bool {
        self.awaiting_pong_since
            .is_some_and(|since| since.elapsed() >= self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn keepalive(interval_ms: u64, timeout_ms: u64) -> Keepalive {
        Keepalive::new(&SessionConfig {
            keepalive_interval: Duration::from_millis(interval_ms),
            keepalive_timeout: Duration::from_millis(timeout_ms),
            ..SessionConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_expires_without_pong() {
        let mut ka = keepalive(100, 100);

        ka.tick().await;
        assert!(ka.should_ping());
        ka.on_ping();
        assert!(!ka.expired());

        ka.tick().await;
        assert!(ka.expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_pong_clears_deadline() {
        let mut ka = keepalive(100, 100);

        ka.tick().await;
        ka.on_ping();
        ka.on_pong();

        ka.tick().await;
        assert!(!ka.expired());
        assert!(ka.should_ping());
    }

    #[test]
    fn test_only_request_frames_count_during_auth() {
        assert!(carries_request_id(&Message::Text(
            r#"{"id":"r1","method":"GET","url":"/"}"#.to_string()
        )));
        assert!(carries_request_id(&Message::Binary(
            br#"{"id":"r2"}"#.to_vec()
        )));
        assert!(!carries_request_id(&Message::Text("Invalid API key".to_string())));
        assert!(!carries_request_id(&Message::Text(r#"{"error":"denied"}"#.to_string())));
        assert!(!carries_request_id(&Message::Ping(Vec::new())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_keepalive_never_ticks() {
        let mut ka = keepalive(0, 100);

        let ticked = tokio::time::timeout(Duration::from_secs(3600), ka.tick()).await;
        assert!(ticked.is_err());
    }
}
