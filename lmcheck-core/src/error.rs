//! Error types for lmcheck operations.

/// The main error type for language-model checks.
///
/// Configuration variants come out of descriptor parsing and backend
/// resolution. Everything the invocation pipeline can recover from by asking
/// again is reported by [`LmError::is_retryable`].
#[derive(Debug, thiserror::Error)]
pub enum LmError {
    /// Malformed connection descriptor
    #[error("Invalid connection descriptor: {0}")]
    Descriptor(String),

    /// Missing or invalid backend configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Backend kind that no factory branch understands
    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    /// Backend-specific errors
    #[error("Backend error: {0}")]
    Backend(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The backend answered but produced no usable completion text
    #[error("Empty completion: {0}")]
    EmptyCompletion(String),

    /// No JSON value could be recovered from the model output
    #[error("Failed to extract JSON from model output: {0}")]
    Extraction(String),

    /// Model output did not match the expected schema
    #[error("Schema validation failed: {0}")]
    Schema(String),

    /// Model output carried a `type` other than `content` or `error`
    #[error("Unexpected response type: {0}")]
    UnexpectedType(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cache file I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Error: {0}")]
    Other(String),
}

impl LmError {
    /// Create a descriptor error
    pub fn descriptor(msg: impl Into<String>) -> Self {
        Self::Descriptor(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an unsupported backend error
    pub fn unsupported_backend(kind: impl Into<String>) -> Self {
        Self::UnsupportedBackend(kind.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create an authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create an empty completion error
    pub fn empty_completion(msg: impl Into<String>) -> Self {
        Self::EmptyCompletion(msg.into())
    }

    /// Create an extraction error
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    /// Create a schema validation error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create an unexpected response type error
    pub fn unexpected_type(msg: impl Into<String>) -> Self {
        Self::UnexpectedType(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this is a configuration problem rather than a per-call failure
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LmError::Descriptor(_) | LmError::Configuration(_) | LmError::UnsupportedBackend(_)
        )
    }

    /// Check if asking the model again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LmError::Backend(_)
                | LmError::Network(_)
                | LmError::Authentication(_)
                | LmError::EmptyCompletion(_)
                | LmError::Extraction(_)
                | LmError::Schema(_)
                | LmError::UnexpectedType(_)
                | LmError::Serialization(_)
                | LmError::Other(_)
        )
    }
}

impl From<String> for LmError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for LmError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LmError::extraction("no json").is_retryable());
        assert!(LmError::schema("missing field").is_retryable());
        assert!(LmError::empty_completion("no choices").is_retryable());
        assert!(!LmError::configuration("missing endpoint").is_retryable());
        assert!(!LmError::descriptor("bad segment").is_retryable());
    }

    #[test]
    fn test_configuration_classification() {
        assert!(LmError::unsupported_backend("foo").is_configuration());
        assert!(!LmError::backend("boom").is_configuration());
    }
}
