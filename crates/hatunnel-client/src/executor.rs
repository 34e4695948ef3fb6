//! Backend executor
//!
//! Turns one request envelope into a real HTTP call against the local backend.
//! Every outcome becomes a response envelope: the relay is always answered for an
//! id it sent, and failures never reach the session.

use crate::config::ClientConfig;
use hatunnel_proto::{CodecError, EnvelopeCodec, RequestEnvelope, ResponseEnvelope};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Request headers owned by the HTTP client rather than forwarded.
/// `host` must match the backend, the others are recomputed for the re-sent body.
const STRIPPED_REQUEST_HEADERS: [&str; 4] =
    ["host", "content-length", "transfer-encoding", "connection"];

#[derive(Debug, Error)]
enum ExecutorError {
    #[error("invalid request body: {0}")]
    Body(#[from] CodecError),

    #[error("invalid method '{0}'")]
    Method(String),

    #[error("request target must be relative to the backend, got '{0}'")]
    AbsoluteTarget(String),

    #[error("backend did not respond within {0:?}")]
    Timeout(Duration),

    #[error("backend request failed: {0}")]
    Backend(reqwest::Error),
}

/// Executes forwarded requests against the local backend
#[derive(Debug, Clone)]
pub struct BackendExecutor {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl BackendExecutor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            // Redirects belong to the remote caller, not to the tunnel
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, reqwest::Error> {
        Self::new(config.backend_url(), config.backend_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Decode a raw frame and execute it
    ///
    /// Returns `None` only when the frame is so malformed that no request id can be
    /// recovered; there is nobody to answer in that case.
    pub async fn handle_frame(&self, frame: &[u8]) -> Option<ResponseEnvelope> {
        match EnvelopeCodec::decode_request(frame) {
            Ok(request) => Some(self.execute(&request).await),
            Err(e) => Self::reject_frame(frame, &e),
        }
    }

    /// Failure response for a frame that could not be decoded
    pub fn reject_frame(frame: &[u8], err: &CodecError) -> Option<ResponseEnvelope> {
        match EnvelopeCodec::recover_id(frame) {
            Some(id) => {
                warn!("Malformed request {}: {}", id, err);
                Some(ResponseEnvelope::failure(
                    id,
                    format!("Tunnel client error: {}", err),
                ))
            }
            None => {
                warn!("Dropping malformed frame without request id: {}", err);
                None
            }
        }
    }

    /// Execute a request; never fails, errors become a 500 envelope with the same id
    pub async fn execute(&self, request: &RequestEnvelope) -> ResponseEnvelope {
        let start = Instant::now();

        match self.forward(request).await {
            Ok(response) => {
                info!(
                    "📥 {} {} -> {} ({}ms)",
                    request.method,
                    request.url,
                    response.status,
                    start.elapsed().as_millis()
                );
                response
            }
            Err(e) => {
                warn!(
                    "Error handling proxy request {} ({} {}): {}",
                    request.id, request.method, request.url, e
                );
                ResponseEnvelope::failure(&request.id, format!("Tunnel client error: {}", e))
            }
        }
    }

    async fn forward(&self, request: &RequestEnvelope) -> Result<ResponseEnvelope, ExecutorError> {
        let body = request.body_bytes()?;
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ExecutorError::Method(request.method.clone()))?;
        let target = self.target_url(&request.url)?;

        debug!("📤 Proxying {} {} to {}", method, request.url, target);

        let mut builder = self
            .client
            .request(method, &target)
            .headers(forwarded_headers(&request.headers));
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let headers = flatten_headers(response.headers());
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        Ok(ResponseEnvelope::from_backend(
            &request.id,
            status,
            headers,
            &body,
        ))
    }

    fn target_url(&self, url: &str) -> Result<String, ExecutorError> {
        if url.contains("://") && !url.starts_with('/') {
            return Err(ExecutorError::AbsoluteTarget(url.to_string()));
        }
        if url.is_empty() || url.starts_with('/') {
            Ok(format!("{}{}", self.base_url, url))
        } else {
            Ok(format!("{}/{}", self.base_url, url))
        }
    }

    fn classify(&self, err: reqwest::Error) -> ExecutorError {
        if err.is_timeout() {
            ExecutorError::Timeout(self.timeout)
        } else {
            ExecutorError::Backend(err)
        }
    }
}

fn forwarded_headers(headers: &BTreeMap<String, Vec<String>>) -> HeaderMap {
    let mut map = HeaderMap::new();

    for (name, values) in headers {
        if STRIPPED_REQUEST_HEADERS
            .iter()
            .any(|h| name.eq_ignore_ascii_case(h))
        {
            continue;
        }

        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!("Skipping invalid header name: {:?}", name);
            continue;
        };

        for value in values {
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    map.append(header_name.clone(), v);
                }
                Err(_) => warn!("Skipping invalid value for header {}", name),
            }
        }
    }

    map
}

/// One value per header name; repeated headers are joined with ", "
fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .keys()
        .map(|name| {
            let joined = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            (name.as_str().to_string(), joined)
        })
        .collect()
}
