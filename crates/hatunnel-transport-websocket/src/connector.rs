//! Outbound WebSocket connector

use crate::config::WebSocketConfig;
use crate::{RelayConnector, TransportError, TransportResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector for establishing outgoing relay connections
pub struct WebSocketConnector {
    url: Url,
    url_str: String,
    tls_config: Option<Arc<rustls::ClientConfig>>,
    config: Arc<WebSocketConfig>,
}

impl std::fmt::Debug for WebSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnector")
            .field("url", &self.url_str)
            .finish()
    }
}

impl WebSocketConnector {
    pub fn new(relay_url: &str, config: WebSocketConfig) -> TransportResult<Self> {
        config.validate()?;

        let url = Url::parse(relay_url).map_err(|e| {
            TransportError::ConfigurationError(format!("Invalid relay URL '{}': {}", relay_url, e))
        })?;

        let tls_config = match url.scheme() {
            "wss" => Some(config.build_tls_config()?),
            "ws" => None,
            other => {
                return Err(TransportError::ConfigurationError(format!(
                    "Unsupported relay URL scheme '{}', expected ws or wss",
                    other
                )))
            }
        };

        if url.host_str().is_none() {
            return Err(TransportError::ConfigurationError(format!(
                "Relay URL '{}' has no host",
                relay_url
            )));
        }

        debug!("WebSocket connector created for {}", url);

        Ok(Self {
            url_str: url.to_string(),
            url,
            tls_config,
            config: Arc::new(config),
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.tls_config.is_some()
    }
}

#[async_trait]
impl RelayConnector for WebSocketConnector {
    type Transport = WsStream;

    async fn connect(&self) -> TransportResult<WsStream> {
        debug!("Connecting to WebSocket relay: {}", self.url);

        let connector = self
            .tls_config
            .as_ref()
            .map(|tls| Connector::Rustls(tls.clone()));

        let handshake = tokio_tungstenite::connect_async_tls_with_config(
            self.url.as_str(),
            Some(self.config.protocol_config()),
            false,
            connector,
        );

        let (ws_stream, response) = tokio::time::timeout(self.config.connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout)??;

        info!(
            "WebSocket connection established to {} (HTTP {})",
            self.url,
            response.status()
        );

        Ok(ws_stream)
    }

    fn relay_url(&self) -> &str {
        &self.url_str
    }
}
