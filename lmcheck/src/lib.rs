//! # lmcheck
//!
//! Ask language models structured questions without trusting them.
//!
//! lmcheck sits between code that wants schema-validated answers and a
//! chat-completion backend that is slow, flaky and answers in free text.
//!
//! ## Features
//!
//! - **Pluggable backends**: selected from a `key=value;...` connection descriptor
//! - **Persistent cache**: a bounded per-caller cache survives restarts
//! - **JSON recovery**: fenced, chatty or slightly broken JSON is repaired
//! - **Typed results**: schema-validated payloads, model errors, or "unavailable"
//! - **Batched checks**: thousands of queued checks share bounded backend capacity
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! lmcheck = { version = "0.1", features = ["cloud", "layers", "checker"] }
//! ```
//!
//! ```ignore
//! use lmcheck::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let backend = ProviderFactory::new()
//!     .resolve_from_env()
//!     .ok_or("no language model backend")?;
//!
//! let invoker = Invoker::builder(backend)
//!     .layer(LoggingLayer::new())
//!     .cache(Arc::new(ResponseCache::with_path("lm.cache")))
//!     .finish();
//!
//! let checker = RuleChecker::<RenameData, RenameCheck>::builder("boolean-property")
//!     .message(ChatMessage::user("Check whether the boolean property name reads as a predicate."))
//!     .retry_count(2)
//!     .finish(Some(invoker))?;
//!
//! let result = checker.submit(RenameData::new("enabled")).wait().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: Includes `cloud`, `layers`, `checker` and `schema`
//! - `cloud`: Provider factory and the Azure OpenAI backend
//! - `providers`: All available providers
//! - `layers`: Built-in layers (logging, concurrency limits)
//! - `checker`: Batched rule checker
//! - `schema`: Re-export of `schemars` for deriving payload schemas
//! - `full`: All features enabled

// Re-export core types and traits
pub use lmcheck_core::*;

// Re-export providers under `provider` module
#[cfg(feature = "lmcheck-provider")]
pub mod provider {
    //! Backend resolution and backend implementations.
    pub use lmcheck_provider::*;
}

// Re-export layers under `layer` module
#[cfg(feature = "lmcheck-layer")]
pub mod layer {
    //! Built-in backend layers.
    pub use lmcheck_layer::*;
}

// Re-export the checker under `checker` module
#[cfg(feature = "lmcheck-checker")]
pub mod checker {
    //! Batched rule checks.
    pub use lmcheck_checker::*;
}

// Re-export schemars when schema feature is enabled
#[cfg(feature = "schema")]
pub mod schemars {
    pub use ::schemars::*;
}

/// Prelude module for convenient imports
pub mod prelude {
    //! Prelude module containing the most commonly used types and traits.
    //!
    //! ```
    //! use lmcheck::prelude::*;
    //! ```

    pub use crate::{
        BackendInfo, ChatBackend, ChatMessage, ChatOptions, ConnectionDescriptor, ErrorResponse,
        Invoker, Layer, LmError, Outcome, ResponseCache, ResponseEnvelope, ResponseSchema, Result,
        RetryPolicy, Role,
    };

    #[cfg(feature = "lmcheck-provider")]
    pub use crate::provider::*;

    #[cfg(feature = "lmcheck-layer")]
    pub use crate::layer::*;

    #[cfg(feature = "lmcheck-checker")]
    pub use crate::checker::*;
}
