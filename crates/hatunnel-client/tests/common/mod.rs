//! Shared fixtures: a local HTTP backend and in-memory relay connections

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::Path,
    http::{header, HeaderMap, Method, StatusCode},
    response::{AppendHeaders, IntoResponse},
    routing::{any, get},
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::net::TcpListener;
use tokio_tungstenite::WebSocketStream;

pub type MemoryWs = WebSocketStream<DuplexStream>;

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let custom = headers
        .get_all("x-custom")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("|");

    (
        StatusCode::CREATED,
        [
            ("x-echo-method", method.to_string()),
            ("x-seen-host", host),
            ("x-seen-custom", custom),
        ],
        body,
    )
}

/// Size of the `/big` body; too large to fit in one frame once base64-encoded
pub const BIG_BODY_LEN: usize = 13 * 1024 * 1024;

/// Start the test backend on an ephemeral port
pub async fn spawn_backend() -> SocketAddr {
    let app = Router::new()
        .route("/hello", get(|| async { "Hello from backend" }))
        .route("/echo", any(echo))
        .route(
            "/delay/{ms}",
            get(|Path(ms): Path<u64>| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                format!("slept {}", ms)
            }),
        )
        .route("/big", get(|| async { vec![b'x'; BIG_BODY_LEN] }))
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "nope") }),
        )
        .route(
            "/redirect",
            get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/hello")]) }),
        )
        .route(
            "/cookies",
            get(|| async {
                (
                    AppendHeaders([(header::SET_COOKIE, "a=1"), (header::SET_COOKIE, "b=2")]),
                    "ok",
                )
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// An address nothing listens on
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A connected (client, relay) WebSocket pair over an in-memory pipe
pub async fn ws_pair() -> (MemoryWs, MemoryWs) {
    let (client_io, relay_io) = tokio::io::duplex(1024 * 1024);

    let relay = tokio::spawn(async move { tokio_tungstenite::accept_async(relay_io).await.unwrap() });

    let (client, _response) = tokio_tungstenite::client_async("ws://relay.test/connect", client_io)
        .await
        .unwrap();
    let relay = relay.await.unwrap();

    (client, relay)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("hatunnel_client=debug")
        .with_test_writer()
        .try_init();
}
