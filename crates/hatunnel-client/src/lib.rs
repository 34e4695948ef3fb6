//! Tunnel client library
//!
//! Keeps one authenticated WebSocket connection open to the relay, executes every
//! forwarded HTTP request against the local backend and answers over the same
//! connection. Reconnects forever with exponential backoff.

pub mod config;
pub mod executor;
pub mod reconnect;
pub mod session;
pub mod status;
pub mod status_server;
pub mod supervisor;

pub use config::{ClientConfig, ClientConfigBuilder, ConfigError, SessionConfig};
pub use executor::BackendExecutor;
pub use reconnect::{ReconnectConfig, ReconnectManager};
pub use session::{AuthWait, AuthenticatedSession, Session, TerminationReason};
pub use status::{
    read_status_file, ConnectionStatus, FileStatusSink, MultiStatusSink, StatusSink,
    WatchStatusSink, INITIALIZING,
};
pub use status_server::StatusServer;
pub use supervisor::Supervisor;

pub use hatunnel_proto::{RequestEnvelope, ResponseEnvelope};
