//! Invocation runtime.
//!
//! Sits between callers asking for structured answers and the raw
//! [`ChatBackend`](crate::backend::ChatBackend): consults the response cache,
//! appends the output contract, recovers JSON from the reply, validates it
//! and retries transient failures.

pub mod invoker;
pub mod retry;

pub use invoker::{Invoker, InvokerBuilder};
pub use retry::RetryPolicy;
