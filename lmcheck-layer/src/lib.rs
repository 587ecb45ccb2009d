//! # lmcheck layers
//!
//! Built-in layers for chat backends.
//!
//! Currently implemented layers:
//! - `LoggingLayer`: Logs every completion with timing information
//! - `ConcurrencyLimitLayer`: Caps the number of completions in flight
//!
//! ## Usage
//!
//! ```ignore
//! use lmcheck_core::Invoker;
//! use lmcheck_layer::{ConcurrencyLimitLayer, LoggingLayer};
//!
//! let invoker = Invoker::builder(backend)
//!     .layer(ConcurrencyLimitLayer::new(4))
//!     .layer(LoggingLayer::new())
//!     .finish();
//! ```

pub mod concurrency;
pub mod logging;

// Re-exports
pub use concurrency::{ConcurrencyLimitBackend, ConcurrencyLimitLayer};
pub use logging::{LoggingBackend, LoggingLayer};
