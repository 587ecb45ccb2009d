//! Check tasks and their results.

use lmcheck_core::types::ErrorResponse;
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Identifier of a queued check.
pub type TaskId = Uuid;

/// A value to be checked by a rule.
///
/// The payload is serialized into the prompt. Its subject, together with the
/// rule name, identifies the caller in the response cache, so it should
/// name what is being checked (for example `Model.propertyName`).
pub trait CheckPayload: Serialize + Send + Sync + 'static {
    fn subject(&self) -> String;
}

/// Why a check did not produce a payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CheckError {
    /// The model answered with a well-formed error
    #[error("language model reported an error: {}", .0.error)]
    Model(ErrorResponse),

    /// No usable answer could be obtained.
    ///
    /// `first_report` is set on the first such result of a checker, so call
    /// sites can report a systemic outage once instead of per value.
    #[error("language model is unavailable")]
    Unavailable { first_report: bool },

    /// The checker stopped before the check ran
    #[error("check was cancelled before it completed")]
    Cancelled,
}

pub(crate) type OnSuccess<T> = Box<dyn FnOnce(T) + Send>;
pub(crate) type OnError = Box<dyn FnOnce(CheckError) + Send>;

/// Where the result of a task goes.
pub(crate) enum Reply<T> {
    Callbacks {
        on_success: OnSuccess<T>,
        on_error: OnError,
    },
    Channel(oneshot::Sender<Result<T, CheckError>>),
}

impl<T> Reply<T> {
    /// Route a result. Exactly one callback runs.
    pub(crate) fn send(self, result: Result<T, CheckError>) {
        match self {
            Reply::Callbacks {
                on_success,
                on_error,
            } => match result {
                Ok(value) => on_success(value),
                Err(e) => on_error(e),
            },
            Reply::Channel(tx) => {
                // The handle may already be gone.
                let _ = tx.send(result);
            }
        }
    }
}

/// One queued check.
pub(crate) struct CheckTask<P, T> {
    pub(crate) id: TaskId,
    pub(crate) payload: P,
    pub(crate) reply: Reply<T>,
}

impl<P, T> CheckTask<P, T> {
    pub(crate) fn new(payload: P, reply: Reply<T>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            reply,
        }
    }
}

/// Awaitable result of a check queued with [`submit`](crate::RuleChecker::submit).
///
/// Dropping the handle abandons the check; an abandoned check that has not
/// finished yet is stopped before its result is cached.
#[derive(Debug)]
pub struct CheckHandle<T> {
    id: TaskId,
    rx: oneshot::Receiver<Result<T, CheckError>>,
}

impl<T> CheckHandle<T> {
    pub(crate) fn new(id: TaskId, rx: oneshot::Receiver<Result<T, CheckError>>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Wait for the result
    pub async fn wait(self) -> Result<T, CheckError> {
        self.rx.await.unwrap_or(Err(CheckError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_callbacks_receive_exactly_one_result() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (ok, err) = (seen.clone(), seen.clone());
        let reply: Reply<u32> = Reply::Callbacks {
            on_success: Box::new(move |v| ok.lock().unwrap().push(format!("ok {}", v))),
            on_error: Box::new(move |e| err.lock().unwrap().push(format!("err {}", e))),
        };
        reply.send(Err(CheckError::Unavailable { first_report: true }));

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["err language model is unavailable".to_string()]
        );
    }

    #[tokio::test]
    async fn test_handle_reports_cancelled_when_sender_dropped() {
        let (tx, rx) = oneshot::channel::<Result<u32, CheckError>>();
        let handle = CheckHandle::new(Uuid::new_v4(), rx);
        drop(tx);
        assert_eq!(handle.wait().await, Err(CheckError::Cancelled));
    }

    #[tokio::test]
    async fn test_channel_reply() {
        let (tx, rx) = oneshot::channel();
        let handle = CheckHandle::new(Uuid::new_v4(), rx);
        Reply::Channel(tx).send(Ok(7u32));
        assert_eq!(handle.wait().await, Ok(7));
    }
}
