//! Text-frame codec
//!
//! Frames are JSON objects carried as WebSocket text. The codec is a thin
//! error-mapping layer over `serde_json`: outbound failures surface to the
//! caller, inbound failures map to [`Error::Serialization`] so the router
//! can log and drop the frame without propagating anything.

use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;

/// Encode a message for the wire.
pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    serde_json::to_string(message).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode an inbound text frame.
pub fn decode(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| Error::Serialization(e.to_string()))
}
