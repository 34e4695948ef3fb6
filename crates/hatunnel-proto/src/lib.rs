//! Tunnel Protocol Definitions
//!
//! Envelope types exchanged with the relay and the JSON codec that moves them
//! over WebSocket frames. Bodies travel base64-encoded so every frame stays valid text.

pub mod codec;
pub mod messages;

pub use codec::{CodecError, EnvelopeCodec};
pub use messages::*;

/// Status reported back to the relay when a request could not be served
pub const TUNNEL_ERROR_STATUS: u16 = 500;

/// Maximum frame size accepted from the relay (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
