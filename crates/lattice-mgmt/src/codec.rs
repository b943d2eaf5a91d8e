//! Value codecs: the pluggable serialization seam between bean values and
//! wire bytes.
//!
//! The codec id travels in the handshake so both peers agree before any
//! attribute or parameter crosses the channel.

use crate::error::BeanError;
use serde_json::Value;

/// Encodes and decodes bean values for the wire.
pub trait ValueCodec: Send + Sync {
    /// Stable identifier exchanged during the handshake.
    fn id(&self) -> &'static str;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, BeanError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, BeanError>;
}

/// Default codec: compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn id(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, BeanError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, BeanError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
