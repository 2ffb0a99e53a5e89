//! Serialization framework for workflow payloads.
//!
//! Workflow inputs, activity arguments, signal payloads, query answers and
//! results all cross the runtime boundary as bytes. This module provides the
//! converter used to produce and consume those bytes.

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Trait for data converters/serializers
pub trait DataConverter: Send + Sync {
    /// Encode a value to bytes
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, EncodingError>;
    /// Decode bytes to a value
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, EncodingError>;
}

/// Default JSON data converter
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDataConverter;

impl JsonDataConverter {
    pub fn new() -> Self {
        Self
    }
}

impl DataConverter for JsonDataConverter {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, EncodingError> {
        serde_json::to_vec(value).map_err(|e| EncodingError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, EncodingError> {
        serde_json::from_slice(data).map_err(|e| EncodingError::Deserialization(e.to_string()))
    }
}

/// Encoding errors
#[derive(Debug, Clone, PartialEq)]
pub enum EncodingError {
    Serialization(String),
    Deserialization(String),
    MissingPayload,
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            EncodingError::Deserialization(msg) => write!(f, "Deserialization error: {}", msg),
            EncodingError::MissingPayload => write!(f, "Expected a payload but none was given"),
        }
    }
}

impl std::error::Error for EncodingError {}

/// Encoded value that can be decoded later
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue {
    data: Vec<u8>,
}

impl EncodedValue {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Decode to a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EncodingError> {
        decode(&self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Convenience functions
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, EncodingError> {
    JsonDataConverter::new().encode(value)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, EncodingError> {
    JsonDataConverter::new().decode(data)
}

/// Decode an optional payload, failing when it is absent.
pub fn decode_required<T: DeserializeOwned>(data: Option<&[u8]>) -> Result<T, EncodingError> {
    match data {
        Some(bytes) => decode(bytes),
        None => Err(EncodingError::MissingPayload),
    }
}

/// Serde helpers for byte payloads stored inside history events.
///
/// Payloads are usually JSON produced by [`JsonDataConverter`], so they are
/// written as UTF-8 strings to keep exported histories readable. Anything
/// that is not valid UTF-8 falls back to a byte array.
pub mod payload_serde {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPayload {
        Text(String),
        Bytes(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            None => s.serialize_none(),
            Some(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => s.serialize_some(text),
                Err(_) => s.serialize_some(bytes),
            },
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw = Option::<RawPayload>::deserialize(d)?;
        Ok(raw.map(|payload| match payload {
            RawPayload::Text(text) => text.into_bytes(),
            RawPayload::Bytes(bytes) => bytes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Probe {
        ip: String,
        attempts: i32,
    }

    #[test]
    fn test_json_encode_decode() {
        let converter = JsonDataConverter::new();
        let original = Probe {
            ip: "203.0.113.5".to_string(),
            attempts: 2,
        };

        let encoded = converter.encode(&original).unwrap();
        let decoded: Probe = converter.decode(&encoded).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn test_decode_required_rejects_missing_payload() {
        let err = decode_required::<Probe>(None).unwrap_err();
        assert_eq!(err, EncodingError::MissingPayload);
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "payload_serde", default)]
        payload: Option<Vec<u8>>,
    }

    #[test]
    fn test_payloads_are_readable_in_json() {
        let holder = Holder {
            payload: Some(br#"{"address":null}"#.to_vec()),
        };
        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(json, r#"{"payload":"{\"address\":null}"}"#);

        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, holder);
    }

    #[test]
    fn test_non_utf8_payloads_fall_back_to_bytes() {
        let holder = Holder {
            payload: Some(vec![0xff, 0x00, 0x10]),
        };
        let json = serde_json::to_string(&holder).unwrap();
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, holder);

        let missing: Holder = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.payload, None);
    }
}
