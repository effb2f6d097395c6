//! JSON encoding and decoding for signaling frames.
//!
//! Frames are UTF-8 JSON text. Decoding accepts raw bytes so the relay can
//! treat text and binary WebSocket frames the same way.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::signal::{ClientMessage, ServerMessage};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The frame is not a well-formed message.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Encodes a message into a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the message cannot be serialized.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a message from the bytes of a JSON frame.
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` if the bytes are not valid UTF-8 JSON
/// or do not describe a known message.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::InvalidFrame(e.to_string()))
}

/// Decodes an inbound frame from a browser peer.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_client(bytes: &[u8]) -> Result<ClientMessage, CodecError> {
    decode(bytes)
}

/// Encodes an outbound frame for a browser peer.
///
/// # Errors
///
/// See [`encode`].
pub fn encode_server(msg: &ServerMessage) -> Result<String, CodecError> {
    encode(msg)
}
