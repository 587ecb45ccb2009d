//! Backend trait and core abstractions.

use crate::error::LmError;
use crate::types::*;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Core backend trait for chat-completion services.
///
/// A backend only turns an ordered list of messages into completion text.
/// Caching, JSON recovery, schema validation and retries are handled by the
/// runtime layer on top of it. Implementations must not panic on transport
/// failures; every failure is returned as an [`LmError`].
#[async_trait]
pub trait ChatBackend: Send + Sync + Debug + 'static {
    /// Get backend information
    fn info(&self) -> Arc<BackendInfo>;

    /// Chat completion (non-streaming)
    ///
    /// Returns the text of the first completion choice.
    async fn chat_complete(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, LmError>;
}

#[async_trait]
impl<B: ChatBackend + ?Sized> ChatBackend for Arc<B> {
    fn info(&self) -> Arc<BackendInfo> {
        (**self).info()
    }

    async fn chat_complete(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, LmError> {
        (**self).chat_complete(messages, options).await
    }
}
