//! Codecs for instance keys, state values and output records
//!
//! The sink never chooses a wire format itself: callers inject a [`Serializer`] for keys and
//! one for state, and output records are encoded by their
//! [`RecordsBuilder`](crate::RecordsBuilder).

mod error;

use serde::{Deserialize, Serialize};

pub use error::SerializationError;

/// Trait for serializers that can convert between objects and bytes
pub trait Serializer<T> {
    /// Serialize an object to bytes
    fn serialize(&self, value: &T) -> Result<Vec<u8>, SerializationError>;

    /// Deserialize bytes to an object
    fn deserialize(&self, bytes: &[u8]) -> Result<T, SerializationError>;
}

// JSON Serialization Helpers
//==========================

/// Serialize a struct to JSON bytes
pub fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, SerializationError> {
    serde_json::to_vec(value)
        .map_err(|e| SerializationError::json_error("Failed to serialize to JSON bytes", e))
}

/// Deserialize JSON bytes to a struct
pub fn from_json<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, SerializationError> {
    serde_json::from_slice(bytes)
        .map_err(|e| SerializationError::json_error("Failed to deserialize from JSON bytes", e))
}

/// JSON serializer implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T> Serializer<T> for JsonSerializer
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        to_json(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        from_json(bytes)
    }
}

// Raw Bytes Serialization (No-op)
//===================================

/// Raw bytes serializer that performs no serialization/deserialization
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl Serializer<Vec<u8>> for BytesSerializer {
    fn serialize(&self, value: &Vec<u8>) -> Result<Vec<u8>, SerializationError> {
        Ok(value.clone())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>, SerializationError> {
        Ok(bytes.to_vec())
    }
}

/// String serializer that converts strings to/from UTF-8 bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl Serializer<String> for StringSerializer {
    fn serialize(&self, value: &String) -> Result<Vec<u8>, SerializationError> {
        Ok(value.as_bytes().to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String, SerializationError> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| SerializationError::DeserializationFailed(format!("Invalid UTF-8: {}", e)))
    }
}
