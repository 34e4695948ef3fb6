//! Connection status reporting
//!
//! The status is a single human-readable line, last write wins. Sinks are
//! write-only from the tunnel's point of view; the status UI reads them.

use crate::session::TerminationReason;
use hatunnel_transport_websocket::TransportError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// What a reader sees before the tunnel has published anything
pub const INITIALIZING: &str = "Initializing...";

/// Write-only status target
pub trait StatusSink: Send + Sync {
    fn publish(&self, status: &str);
}

/// Session-level states shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting { relay_url: String },
    Connected { public_host: String },
    AuthenticationFailed,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    /// Status after a failed connection attempt
    pub fn for_connect_error(err: &TransportError) -> Self {
        match err {
            TransportError::Rejected(_) => Self::Disconnected,
            _ => Self::Error,
        }
    }
}

impl From<&TerminationReason> for ConnectionStatus {
    fn from(reason: &TerminationReason) -> Self {
        match reason {
            TerminationReason::AuthFailed => Self::AuthenticationFailed,
            TerminationReason::Closed | TerminationReason::KeepaliveTimeout => Self::Disconnected,
            TerminationReason::Transport(_) => Self::Error,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting { relay_url } => write!(f, "Connecting to {}...", relay_url),
            Self::Connected { public_host } => write!(f, "Connected as {}", public_host),
            Self::AuthenticationFailed => f.write_str("Authentication failed. Reconnecting..."),
            Self::Disconnected => f.write_str("Disconnected. Reconnecting..."),
            Self::Error => f.write_str("Error. Reconnecting..."),
        }
    }
}

/// Writes the current status to a file for an out-of-process UI
///
/// Publishing never touches the filesystem: it hands the line to a background
/// task that writes with `tokio::fs`. Updates that arrive while a write is in
/// progress collapse into the newest one.
#[derive(Debug, Clone)]
pub struct FileStatusSink {
    path: PathBuf,
    tx: Arc<watch::Sender<Option<String>>>,
}

impl FileStatusSink {
    /// Start the writer task; must be called inside a Tokio runtime
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = watch::channel(None);
        tokio::spawn(write_status_file(path.clone(), rx));
        Self {
            path,
            tx: Arc::new(tx),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatusSink for FileStatusSink {
    fn publish(&self, status: &str) {
        self.tx.send_replace(Some(status.to_string()));
    }
}

async fn write_status_file(path: PathBuf, mut rx: watch::Receiver<Option<String>>) {
    while rx.changed().await.is_ok() {
        let Some(status) = rx.borrow_and_update().clone() else {
            continue;
        };
        match tokio::fs::write(&path, &status).await {
            Ok(()) => info!("Status updated to: {}", status),
            Err(e) => error!("Failed to write status file {}: {}", path.display(), e),
        }
    }
}

/// Read the status file the way the UI does; a missing file means not started yet
pub fn read_status_file(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(status) => status.trim().to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => INITIALIZING.to_string(),
        Err(e) => {
            warn!("Failed to read status file {}: {}", path.display(), e);
            INITIALIZING.to_string()
        }
    }
}

/// In-process sink backed by a watch channel
#[derive(Debug, Clone)]
pub struct WatchStatusSink {
    tx: Arc<watch::Sender<String>>,
}

impl WatchStatusSink {
    pub fn new() -> (Self, watch::Receiver<String>) {
        let (tx, rx) = watch::channel(INITIALIZING.to_string());
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }
}

impl StatusSink for WatchStatusSink {
    fn publish(&self, status: &str) {
        self.tx.send_replace(status.to_string());
    }
}

/// Fans every update out to several sinks
#[derive(Default, Clone)]
pub struct MultiStatusSink {
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl MultiStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl StatusSink for MultiStatusSink {
    fn publish(&self, status: &str) {
        for sink in &self.sinks {
            sink.publish(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lines() {
        assert_eq!(
            ConnectionStatus::Connecting {
                relay_url: "wss://webfork.tech/connect".to_string()
            }
            .to_string(),
            "Connecting to wss://webfork.tech/connect..."
        );
        assert_eq!(
            ConnectionStatus::Connected {
                public_host: "home.webfork.tech".to_string()
            }
            .to_string(),
            "Connected as home.webfork.tech"
        );
        assert_eq!(
            ConnectionStatus::from(&TerminationReason::Closed).to_string(),
            "Disconnected. Reconnecting..."
        );
        assert_eq!(
            ConnectionStatus::from(&TerminationReason::Transport("reset".into())).to_string(),
            "Error. Reconnecting..."
        );
        assert_eq!(
            ConnectionStatus::from(&TerminationReason::AuthFailed),
            ConnectionStatus::AuthenticationFailed
        );
    }

    #[test]
    fn test_connect_error_status() {
        assert_eq!(
            ConnectionStatus::for_connect_error(&TransportError::Rejected(403)),
            ConnectionStatus::Disconnected
        );
        assert_eq!(
            ConnectionStatus::for_connect_error(&TransportError::Timeout),
            ConnectionStatus::Error
        );
    }

    async fn wait_for_status(path: &Path, expected: &str) {
        for _ in 0..200 {
            if read_status_file(path) == expected {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("status file never became {:?}", expected);
    }

    #[tokio::test]
    async fn test_file_sink_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunnel_status");

        assert_eq!(read_status_file(&path), INITIALIZING);

        let sink = FileStatusSink::spawn(&path);
        sink.publish("Connecting to wss://relay/connect...");
        sink.publish("Connected as home.relay");

        wait_for_status(&path, "Connected as home.relay").await;

        sink.publish("Disconnected. Reconnecting...");
        wait_for_status(&path, "Disconnected. Reconnecting...").await;
    }

    #[tokio::test]
    async fn test_file_sink_unwritable_path_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let sink = FileStatusSink::spawn(missing.join("status"));
        sink.publish("Connected as home.relay");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // the writer survives the failure and picks up later updates
        std::fs::create_dir(&missing).unwrap();
        sink.publish("Disconnected. Reconnecting...");
        wait_for_status(&missing.join("status"), "Disconnected. Reconnecting...").await;
    }

    #[tokio::test]
    async fn test_watch_and_multi_sink() {
        let (watch_sink, rx) = WatchStatusSink::new();
        assert_eq!(*rx.borrow(), INITIALIZING);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status");

        let multi = MultiStatusSink::new()
            .with(Arc::new(watch_sink))
            .with(Arc::new(FileStatusSink::spawn(&path)));
        assert_eq!(multi.len(), 2);

        multi.publish("Error. Reconnecting...");

        assert_eq!(*rx.borrow(), "Error. Reconnecting...");
        wait_for_status(&path, "Error. Reconnecting...").await;
    }
}
