//! Error types for serialization

/// Serialization error type
#[derive(Debug)]
pub enum SerializationError {
    SerializationFailed(String),
    DeserializationFailed(String),
    /// Record had no key where one is required (state topic records)
    MissingKey,
    JsonSerializationFailed(Box<serde_json::Error>),
}

impl SerializationError {
    pub fn json_error(context: &str, err: serde_json::Error) -> Self {
        log::debug!("{}: {}", context, err);
        SerializationError::JsonSerializationFailed(Box::new(err))
    }
}

impl std::fmt::Display for SerializationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializationError::SerializationFailed(msg) => {
                write!(f, "Serialization failed: {}", msg)
            }
            SerializationError::DeserializationFailed(msg) => {
                write!(f, "Deserialization failed: {}", msg)
            }
            SerializationError::MissingKey => write!(f, "Record has no key"),
            SerializationError::JsonSerializationFailed(e) => {
                write!(f, "JSON serialization failed: {}", e)
            }
        }
    }
}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializationError::JsonSerializationFailed(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}
