//! # lmcheck core
//!
//! Core abstractions and runtime for asking language models structured
//! questions.
//!
//! This crate provides the backend trait, layer composition, the persisted
//! response cache, JSON recovery from free-form model output, and the
//! retrying invocation pipeline built on top of them.

pub mod backend;
pub mod cache;
pub mod descriptor;
pub mod error;
pub mod extract;
pub mod layer;
pub mod runtime;
pub mod schema;
pub mod types;

// Re-exports
pub use backend::ChatBackend;
pub use cache::{CacheEntry, ResponseCache, MAX_ENTRIES_PER_KEY};
pub use descriptor::ConnectionDescriptor;
pub use error::LmError;
pub use extract::extract_json;
pub use layer::{Layer, LayeredBackend};
pub use runtime::{Invoker, InvokerBuilder, RetryPolicy};
pub use schema::ResponseSchema;
pub use types::*;

/// Result type alias for lmcheck operations
pub type Result<T> = std::result::Result<T, LmError>;
