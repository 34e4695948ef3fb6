//! Protocol message types

use crate::codec::{decode_body, encode_body, CodecError};
use crate::TUNNEL_ERROR_STATUS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// HTTP request forwarded by the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestEnvelope {
    /// Correlation token, echoed back in the response
    pub id: String,
    pub method: String,
    /// Path and query, relative to the backend base URL
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    /// Base64 body; absent or null means no body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl RequestEnvelope {
    pub fn new(id: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.body = Some(encode_body(body));
        self
    }

    /// Raw request body bytes
    pub fn body_bytes(&self) -> Result<Vec<u8>, CodecError> {
        match self.body.as_deref() {
            None | Some("") => Ok(Vec::new()),
            Some(encoded) => decode_body(encoded),
        }
    }
}

/// HTTP response sent back to the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Base64 body
    #[serde(default)]
    pub body: String,
    /// Diagnostic text, only present when the tunnel client failed the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Build a response carrying a backend result
    pub fn from_backend(
        id: impl Into<String>,
        status: u16,
        headers: BTreeMap<String, String>,
        body: &[u8],
    ) -> Self {
        Self {
            id: id.into(),
            status,
            headers,
            body: encode_body(body),
            error: None,
        }
    }

    /// Build the failure response for a request the client could not serve
    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TUNNEL_ERROR_STATUS,
            headers: BTreeMap::new(),
            body: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    pub fn body_bytes(&self) -> Result<Vec<u8>, CodecError> {
        decode_body(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_without_body_has_empty_bytes() {
        let req = RequestEnvelope::new("r1", "GET", "/");
        assert!(req.body_bytes().unwrap().is_empty());

        let req = RequestEnvelope {
            body: Some(String::new()),
            ..req
        };
        assert!(req.body_bytes().unwrap().is_empty());
    }

    #[test]
    fn test_request_builder_collects_header_values() {
        let req = RequestEnvelope::new("r1", "GET", "/")
            .with_header("Accept", "text/html")
            .with_header("Accept", "application/json");

        assert_eq!(
            req.headers.get("Accept").unwrap(),
            &vec!["text/html".to_string(), "application/json".to_string()]
        );
    }

    #[test]
    fn test_failure_response() {
        let resp = ResponseEnvelope::failure("abc", "backend unreachable");

        assert_eq!(resp.id, "abc");
        assert_eq!(resp.status, TUNNEL_ERROR_STATUS);
        assert!(resp.headers.is_empty());
        assert!(resp.body.is_empty());
        assert!(resp.is_failure());
    }

    #[test]
    fn test_backend_response_body_is_preserved() {
        let payload = [0u8, 159, 146, 150, 255, b'\n'];
        let resp = ResponseEnvelope::from_backend("id-7", 404, BTreeMap::new(), &payload);

        assert!(!resp.is_failure());
        assert_eq!(resp.body_bytes().unwrap(), payload);
    }
}
