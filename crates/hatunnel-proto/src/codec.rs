//! Codec for encoding/decoding tunnel envelopes

use crate::messages::{RequestEnvelope, ResponseEnvelope};
use crate::MAX_FRAME_SIZE;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid body encoding: {0}")]
    BodyEncoding(#[from] base64::DecodeError),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
}

pub(crate) fn encode_body(body: &[u8]) -> String {
    STANDARD.encode(body)
}

pub(crate) fn decode_body(encoded: &str) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.decode(encoded)?)
}

/// JSON envelope codec
///
/// Frames are single JSON objects; the WebSocket layer already delimits them,
/// so no length prefix is added.
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Decode a request frame received from the relay
    pub fn decode_request(frame: &[u8]) -> Result<RequestEnvelope, CodecError> {
        Self::check_size(frame.len())?;
        Ok(serde_json::from_slice(frame)?)
    }

    /// Encode a response frame for the relay
    pub fn encode_response(resp: &ResponseEnvelope) -> Result<String, CodecError> {
        let text = serde_json::to_string(resp)?;
        Self::check_size(text.len())?;
        Ok(text)
    }

    /// Encode a request frame (relay side, used by tooling and tests)
    pub fn encode_request(req: &RequestEnvelope) -> Result<String, CodecError> {
        let text = serde_json::to_string(req)?;
        Self::check_size(text.len())?;
        Ok(text)
    }

    /// Decode a response frame (relay side, used by tooling and tests)
    pub fn decode_response(frame: &[u8]) -> Result<ResponseEnvelope, CodecError> {
        Self::check_size(frame.len())?;
        Ok(serde_json::from_slice(frame)?)
    }

    /// Best-effort extraction of the correlation id from a frame that failed to decode
    ///
    /// Returns `None` unless the frame is a JSON object with a string `id`.
    pub fn recover_id(frame: &[u8]) -> Option<String> {
        if frame.len() > MAX_FRAME_SIZE {
            return None;
        }
        let value: serde_json::Value = serde_json::from_slice(frame).ok()?;
        value.get("id")?.as_str().map(str::to_owned)
    }

    fn check_size(len: usize) -> Result<(), CodecError> {
        if len > MAX_FRAME_SIZE {
            return Err(CodecError::MessageTooLarge(len));
        }
        Ok(())
    }
}
