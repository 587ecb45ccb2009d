//! Layer trait and abstractions.
//!
//! Layers wrap a backend with cross-cutting concerns such as logging or
//! concurrency limits, returning a new backend with the same interface.

use crate::backend::ChatBackend;
use crate::error::LmError;
use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;

/// Layer trait for wrapping backends.
///
/// Each layer wraps an inner backend and returns a new backend with enhanced
/// capabilities.
pub trait Layer<B: ChatBackend> {
    /// The type of the layered backend
    type LayeredBackend: ChatBackend;

    /// Wrap the inner backend with this layer
    fn layer(&self, inner: B) -> Self::LayeredBackend;
}

/// Helper trait for layered backends.
///
/// Provides default forwarding implementations so implementers only override
/// the methods they want to intercept.
#[async_trait]
pub trait LayeredBackend: Sized + ChatBackend {
    /// The inner backend type
    type Inner: ChatBackend;

    /// Get a reference to the inner backend
    fn inner(&self) -> &Self::Inner;

    /// Default implementation for info - forwards to inner
    fn layered_info(&self) -> Arc<BackendInfo> {
        self.inner().info()
    }

    /// Default implementation for chat_complete - forwards to inner
    async fn layered_chat_complete(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, LmError> {
        self.inner().chat_complete(messages, options).await
    }
}

/// Macro to implement ChatBackend by forwarding to LayeredBackend methods.
#[macro_export]
macro_rules! impl_layered_backend {
    ($type:ty) => {
        #[async_trait::async_trait]
        impl $crate::backend::ChatBackend for $type {
            fn info(&self) -> std::sync::Arc<$crate::types::BackendInfo> {
                $crate::layer::LayeredBackend::layered_info(self)
            }

            async fn chat_complete(
                &self,
                messages: &[$crate::types::ChatMessage],
                options: &$crate::types::ChatOptions,
            ) -> Result<String, $crate::error::LmError> {
                $crate::layer::LayeredBackend::layered_chat_complete(self, messages, options).await
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl ChatBackend for Echo {
        fn info(&self) -> Arc<BackendInfo> {
            BackendInfo::new("echo", "Echo")
        }

        async fn chat_complete(
            &self,
            messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<String, LmError> {
            Ok(messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default())
        }
    }

    #[derive(Debug)]
    struct Counting {
        inner: Echo,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LayeredBackend for Counting {
        type Inner = Echo;

        fn inner(&self) -> &Echo {
            &self.inner
        }

        async fn layered_chat_complete(
            &self,
            messages: &[ChatMessage],
            options: &ChatOptions,
        ) -> Result<String, LmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.chat_complete(messages, options).await
        }
    }

    crate::impl_layered_backend!(Counting);

    #[tokio::test]
    async fn test_layered_backend_forwards() {
        let backend = Counting {
            inner: Echo,
            calls: AtomicUsize::new(0),
        };

        let text = backend
            .chat_complete(&[ChatMessage::user("ping")], &ChatOptions::new())
            .await
            .unwrap();

        assert_eq!(text, "ping");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.info().id, "echo");
    }
}
