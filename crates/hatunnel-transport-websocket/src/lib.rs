//! WebSocket transport to the relay using tokio-tungstenite
//!
//! The relay speaks plain message-oriented WebSocket: one JSON envelope per frame,
//! no stream multiplexing. This crate only establishes the connection (ws:// or
//! wss:// through rustls) and hands back the raw message stream; the session layer
//! owns framing and concurrency.

pub mod config;
pub mod connector;

pub use config::WebSocketConfig;
pub use connector::{WebSocketConnector, WsStream};

use async_trait::async_trait;
use futures_util::{Sink, Stream};
use thiserror::Error;

pub use tokio_tungstenite::tungstenite::Error as WsError;
pub use tokio_tungstenite::tungstenite::Message;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Relay rejected WebSocket upgrade with HTTP status {0}")]
    Rejected(u16),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Timeout")]
    Timeout,
}

impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::Io(e) => TransportError::IoError(e),
            WsError::Http(response) => TransportError::Rejected(response.status().as_u16()),
            WsError::Tls(e) => TransportError::TlsError(e.to_string()),
            other => TransportError::ConnectionError(other.to_string()),
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A full-duplex, message-oriented connection to the relay
pub trait MessageTransport:
    Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send + 'static
{
}

impl<T> MessageTransport for T where
    T: Stream<Item = Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin
        + Send
        + 'static
{
}

/// Establishes fresh connections to the relay
#[async_trait]
pub trait RelayConnector: Send + Sync {
    type Transport: MessageTransport;

    /// Open a new connection; every call yields an independent connection
    async fn connect(&self) -> TransportResult<Self::Transport>;

    /// Relay address, for logs and status messages
    fn relay_url(&self) -> &str;
}
