//! Attribute map segment encoding.
//!
//! A segment is `base64(json(map))` using the standard alphabet, so it never
//! contains the `,` that separates segments inside a token.

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::error::{Result, SessionError};
use crate::value::{AttributeMap, AttributeValue};

/// Serialize an attribute map into an opaque segment.
///
/// Values that would not survive the trip (non-finite floats) are a
/// `Serialization` error.
pub fn encode(map: &AttributeMap) -> Result<String> {
    map.values().try_for_each(AttributeValue::validate)?;
    let json = serde_json::to_vec(map)
        .map_err(|e| SessionError::Serialization(format!("failed to encode attributes: {}", e)))?;
    Ok(STANDARD.encode(json))
}

/// Deserialize a segment produced by [`encode`].
///
/// Bad base64 is a structural problem with the token (`Decoding`); JSON that
/// does not describe a supported attribute map is a `Serialization` failure.
pub fn decode(segment: &str) -> Result<AttributeMap> {
    let json = STANDARD
        .decode(segment)
        .map_err(|e| SessionError::Decoding(format!("invalid base64 segment: {}", e)))?;
    serde_json::from_slice(&json)
        .map_err(|e| SessionError::Serialization(format!("failed to decode attributes: {}", e)))
}
