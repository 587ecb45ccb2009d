//! Concurrency limit layer.
//!
//! Bounds how many completions may be in flight against a backend at once.
//! Every backend produced by one layer shares the same permits.

use async_trait::async_trait;
use lmcheck_core::backend::ChatBackend;
use lmcheck_core::error::LmError;
use lmcheck_core::layer::{Layer, LayeredBackend};
use lmcheck_core::types::*;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Layer that gates calls behind a semaphore.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimitLayer {
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyLimitLayer {
    /// Allow at most `max_in_flight` concurrent calls (at least one)
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Permits currently free
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl<B: ChatBackend> Layer<B> for ConcurrencyLimitLayer {
    type LayeredBackend = ConcurrencyLimitBackend<B>;

    fn layer(&self, inner: B) -> Self::LayeredBackend {
        ConcurrencyLimitBackend {
            inner,
            semaphore: self.semaphore.clone(),
        }
    }
}

/// Backend wrapped with a concurrency limit
#[derive(Debug)]
pub struct ConcurrencyLimitBackend<B> {
    inner: B,
    semaphore: Arc<Semaphore>,
}

#[async_trait]
impl<B: ChatBackend> LayeredBackend for ConcurrencyLimitBackend<B> {
    type Inner = B;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_chat_complete(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, LmError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| LmError::other(format!("concurrency limiter closed: {}", e)))?;

        self.inner.chat_complete(messages, options).await
    }
}

#[async_trait]
impl<B: ChatBackend> ChatBackend for ConcurrencyLimitBackend<B> {
    fn info(&self) -> Arc<BackendInfo> {
        LayeredBackend::layered_info(self)
    }

    async fn chat_complete(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, LmError> {
        LayeredBackend::layered_chat_complete(self, messages, options).await
    }
}
