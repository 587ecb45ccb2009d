//! # lmcheck checker
//!
//! Queueing façade that lets many independent callers share one backend.
//!
//! A [`RuleChecker`] is configured once per rule with a prompt template, a
//! payload schema and retry settings. Values to check are queued without
//! waiting; a dispatcher runs them with bounded concurrency and routes each
//! result to its callbacks or to a [`CheckHandle`].

pub mod checker;
pub mod task;

// Re-exports
pub use checker::{RuleChecker, RuleCheckerBuilder};
pub use task::{CheckError, CheckHandle, CheckPayload, TaskId};
