//! Read-only HTTP view of the tunnel status using Axum
//!
//! `GET /status` returns the current status line and the configured subdomain as
//! JSON; `GET /` serves a small page that polls it.

use axum::{extract::State, response::Html, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Tunnel status</title></head>
<body>
<h1>Tunnel status</h1>
<p>Status: <strong id="status">Loading...</strong></p>
<p>Subdomain: <span id="subdomain"></span></p>
<script>
async function refresh() {
  try {
    const res = await fetch("status");
    const data = await res.json();
    document.getElementById("status").textContent = data.status;
    document.getElementById("subdomain").textContent = data.configured_subdomain;
  } catch (e) {
    document.getElementById("status").textContent = "Unavailable";
  }
}
refresh();
setInterval(refresh, 3000);
</script>
</body>
</html>
"#;

/// JSON body of `GET /status`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
    pub configured_subdomain: String,
}

#[derive(Clone)]
struct AppState {
    status: watch::Receiver<String>,
    subdomain: Arc<str>,
}

/// Status HTTP server
pub struct StatusServer {
    addr: SocketAddr,
    state: AppState,
}

impl StatusServer {
    pub fn new(addr: SocketAddr, status: watch::Receiver<String>, subdomain: &str) -> Self {
        Self {
            addr,
            state: AppState {
                status,
                subdomain: Arc::from(subdomain),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(handle_index))
            .route("/status", get(handle_status))
            .with_state(self.state.clone())
    }

    pub async fn run(self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<(), std::io::Error> {
        info!("📊 Status server listening on http://{}", listener.local_addr()?);
        axum::serve(listener, self.router()).await
    }
}

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: state.status.borrow().clone(),
        configured_subdomain: state.subdomain.to_string(),
    })
}
