//! Core types for language-model checks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Any role string this crate does not recognise
    #[serde(other)]
    Unknown,
}

impl Role {
    /// Wire name of the role, also used in cache fingerprints
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Options passed alongside the messages of a chat completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatOptions {
    /// Preferred model identifiers, most preferred first. Advisory only.
    #[serde(default)]
    pub model_preferences: Vec<String>,
}

impl ChatOptions {
    /// Create options with no preferences
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a preferred model
    pub fn with_model_preference(mut self, model: impl Into<String>) -> Self {
        self.model_preferences.push(model.into());
        self
    }

    /// The most preferred model, if any
    pub fn preferred_model(&self) -> Option<&str> {
        self.model_preferences.first().map(String::as_str)
    }
}

/// Error reported by the model itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
pub struct ErrorResponse {
    /// Error message from the language model
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// A model reply coerced into one of the two accepted shapes.
///
/// On the wire both variants carry a `type` tag, `"content"` or `"error"`,
/// next to their own fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseEnvelope<T> {
    Content(T),
    Error(ErrorResponse),
}

impl<T> ResponseEnvelope<T> {
    pub fn is_error(&self) -> bool {
        matches!(self, ResponseEnvelope::Error(_))
    }
}

/// Terminal outcome of an invocation with retries.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// A schema-valid payload
    Content(T),
    /// The model answered with a well-formed error
    Error(ErrorResponse),
    /// No usable answer was obtained
    Unavailable,
}

impl<T> Outcome<T> {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Outcome::Unavailable)
    }

    /// Convert into the payload, if any
    pub fn content(self) -> Option<T> {
        match self {
            Outcome::Content(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> From<ResponseEnvelope<T>> for Outcome<T> {
    fn from(envelope: ResponseEnvelope<T>) -> Self {
        match envelope {
            ResponseEnvelope::Content(value) => Outcome::Content(value),
            ResponseEnvelope::Error(err) => Outcome::Error(err),
        }
    }
}

/// Backend information
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub id: String,
    pub name: String,
}

impl BackendInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            name: name.into(),
        })
    }
}
