//! Reconnection supervisor
//!
//! Owns the session lifecycle: connect, authenticate, serve, back off, repeat.
//! It is the single writer of both the backoff state and the status sink.

use crate::config::ClientConfig;
use crate::executor::BackendExecutor;
use crate::reconnect::ReconnectManager;
use crate::session::Session;
use crate::status::{ConnectionStatus, StatusSink};
use hatunnel_transport_websocket::RelayConnector;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct Supervisor<C> {
    connector: C,
    config: ClientConfig,
    executor: Arc<BackendExecutor>,
    status: Arc<dyn StatusSink>,
    reconnect: ReconnectManager,
}

impl<C: RelayConnector> Supervisor<C> {
    /// A validated [`ClientConfig`] is required, so a supervisor cannot exist
    /// without credentials.
    pub fn new(
        config: ClientConfig,
        connector: C,
        executor: Arc<BackendExecutor>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let reconnect = ReconnectManager::new(config.reconnect().clone());
        Self {
            connector,
            config,
            executor,
            status,
            reconnect,
        }
    }

    /// Delay the next failure will wait
    pub fn current_backoff(&self) -> Duration {
        self.reconnect.current_backoff()
    }

    /// Run forever; only dropping the future (process shutdown) stops it
    pub async fn run(mut self) {
        info!(
            "Tunnel client starting: relay {}, backend {}",
            self.connector.relay_url(),
            self.executor.base_url()
        );

        loop {
            let delay = self.step().await;
            tokio::time::sleep(delay).await;
        }
    }

    /// One full connection cycle; returns how long to wait before the next one
    pub async fn step(&mut self) -> Duration {
        self.publish(ConnectionStatus::Connecting {
            relay_url: self.connector.relay_url().to_string(),
        });

        let transport = match self.connector.connect().await {
            Ok(transport) => transport,
            Err(e) => {
                let delay = self.reconnect.next_delay();
                error!(
                    "Failed to connect to relay: {}. Reconnecting in {:?}...",
                    e, delay
                );
                self.publish(ConnectionStatus::for_connect_error(&e));
                return delay;
            }
        };

        info!("Connection established. Authenticating...");

        let session = Session::new(
            transport,
            self.config.session().clone(),
            self.executor.clone(),
        );

        let reason = match session.authenticate(self.config.api_key()).await {
            Ok(session) => {
                self.reconnect.reset();
                self.publish(ConnectionStatus::Connected {
                    public_host: self.config.public_host(),
                });
                session.serve().await
            }
            Err(reason) => reason,
        };

        let delay = self.reconnect.next_delay();
        warn!("Connection closed: {}. Reconnecting in {:?}...", reason, delay);
        self.publish(ConnectionStatus::from(&reason));

        delay
    }

    fn publish(&self, status: ConnectionStatus) {
        self.status.publish(&status.to_string());
    }
}
