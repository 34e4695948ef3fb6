//! Client configuration

use crate::reconnect::ReconnectConfig;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Relay domain used when none is configured
pub const DEFAULT_SERVER_DOMAIN: &str = "webfork.tech";

/// Backend reached when no base URL is configured
pub const DEFAULT_BACKEND_URL: &str = "http://supervisor/core";

/// Status file read by the status UI
pub const DEFAULT_STATUS_FILE: &str = "/tmp/tunnel_status";

/// Configuration errors; any of these is fatal at startup
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("API key is required")]
    MissingApiKey,

    #[error("Subdomain is required")]
    MissingSubdomain,

    #[error("Invalid relay URL '{url}': {reason}")]
    InvalidRelayUrl { url: String, reason: String },

    #[error("Invalid backend URL '{url}': {reason}")]
    InvalidBackendUrl { url: String, reason: String },

    #[error("Invalid timing configuration: {0}")]
    InvalidTiming(String),
}

/// Per-connection timing
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long the relay gets to reject the credential by closing the connection
    pub auth_timeout: Duration,
    /// Ping interval; zero disables keepalive
    pub keepalive_interval: Duration,
    /// Time allowed for a pong before the connection is declared dead
    pub keepalive_timeout: Duration,
    /// Capacity of the outbound response queue
    pub outbound_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(2),
            keepalive_interval: Duration::from_secs(20),
            keepalive_timeout: Duration::from_secs(20),
            outbound_queue: 256,
        }
    }
}

/// Tunnel client configuration
///
/// Fields are private and only [`ClientConfigBuilder::build`] constructs one, so a
/// value of this type always carries a credential and a subdomain.
#[derive(Clone)]
pub struct ClientConfig {
    api_key: String,
    subdomain: String,
    server_domain: String,
    relay_url: String,
    backend_url: String,
    backend_timeout: Duration,
    session: SessionConfig,
    reconnect: ReconnectConfig,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("subdomain", &self.subdomain)
            .field("server_domain", &self.server_domain)
            .field("relay_url", &self.relay_url)
            .field("backend_url", &self.backend_url)
            .field("backend_timeout", &self.backend_timeout)
            .field("session", &self.session)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Public host name the relay routes to this client
    pub fn public_host(&self) -> String {
        format!("{}.{}", self.subdomain, self.server_domain)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn subdomain(&self) -> &str {
        &self.subdomain
    }

    pub fn server_domain(&self) -> &str {
        &self.server_domain
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    pub fn backend_timeout(&self) -> Duration {
        self.backend_timeout
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    pub fn reconnect(&self) -> &ReconnectConfig {
        &self.reconnect
    }
}

/// Builder for ClientConfig
#[derive(Debug)]
pub struct ClientConfigBuilder {
    api_key: Option<String>,
    subdomain: Option<String>,
    server_domain: String,
    relay_url: Option<String>,
    backend_url: String,
    backend_timeout: Duration,
    session: SessionConfig,
    reconnect: ReconnectConfig,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            subdomain: None,
            server_domain: DEFAULT_SERVER_DOMAIN.to_string(),
            relay_url: None,
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            backend_timeout: Duration::from_secs(30),
            session: SessionConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.subdomain = Some(subdomain.into());
        self
    }

    pub fn server_domain(mut self, domain: impl Into<String>) -> Self {
        self.server_domain = domain.into();
        self
    }

    /// Override the relay endpoint; defaults to `wss://<server domain>/connect`
    pub fn relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = Some(url.into());
        self
    }

    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        let subdomain = self
            .subdomain
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSubdomain)?;

        let server_domain = self.server_domain.trim().trim_end_matches('.').to_string();
        let relay_url = self
            .relay_url
            .unwrap_or_else(|| format!("wss://{}/connect", server_domain));
        check_url(&relay_url, &["ws", "wss"]).map_err(|reason| ConfigError::InvalidRelayUrl {
            url: relay_url.clone(),
            reason,
        })?;
        check_url(&self.backend_url, &["http", "https"]).map_err(|reason| {
            ConfigError::InvalidBackendUrl {
                url: self.backend_url.clone(),
                reason,
            }
        })?;

        if self.backend_timeout.is_zero() {
            return Err(ConfigError::InvalidTiming(
                "backend timeout must be greater than zero".to_string(),
            ));
        }
        if self.session.auth_timeout.is_zero() {
            return Err(ConfigError::InvalidTiming(
                "authentication timeout must be greater than zero".to_string(),
            ));
        }
        if self.session.outbound_queue == 0 {
            return Err(ConfigError::InvalidTiming(
                "outbound queue capacity must be greater than zero".to_string(),
            ));
        }
        if self.reconnect.initial_backoff > self.reconnect.max_backoff
            || !self.reconnect.multiplier.is_finite()
            || self.reconnect.multiplier < 1.0
        {
            return Err(ConfigError::InvalidTiming(format!(
                "backoff must grow from {:?} up to {:?} by a finite multiplier >= 1, got {}",
                self.reconnect.initial_backoff,
                self.reconnect.max_backoff,
                self.reconnect.multiplier
            )));
        }

        Ok(ClientConfig {
            api_key,
            subdomain,
            server_domain,
            relay_url,
            backend_url: self.backend_url,
            backend_timeout: self.backend_timeout,
            session: self.session,
            reconnect: self.reconnect,
        })
    }
}

fn check_url(raw: &str, schemes: &[&str]) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if !schemes.contains(&url.scheme()) {
        return Err(format!(
            "scheme must be one of {}, got '{}'",
            schemes.join(", "),
            url.scheme()
        ));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}
