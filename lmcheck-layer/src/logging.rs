//! Logging layer for backend calls.

use async_trait::async_trait;
use lmcheck_core::backend::ChatBackend;
use lmcheck_core::error::LmError;
use lmcheck_core::layer::{Layer, LayeredBackend};
use lmcheck_core::types::*;
use std::sync::Arc;

/// Logging layer that logs backend calls.
#[derive(Debug, Clone)]
pub struct LoggingLayer {
    prefix: String,
}

impl LoggingLayer {
    /// Create a new logging layer
    pub fn new() -> Self {
        Self {
            prefix: "[lmcheck]".to_string(),
        }
    }

    /// Create a logging layer with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for LoggingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ChatBackend> Layer<B> for LoggingLayer {
    type LayeredBackend = LoggingBackend<B>;

    fn layer(&self, inner: B) -> Self::LayeredBackend {
        LoggingBackend {
            inner,
            prefix: self.prefix.clone(),
        }
    }
}

/// Backend wrapped with logging
#[derive(Debug)]
pub struct LoggingBackend<B> {
    inner: B,
    prefix: String,
}

#[async_trait]
impl<B: ChatBackend> LayeredBackend for LoggingBackend<B> {
    type Inner = B;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_chat_complete(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, LmError> {
        tracing::debug!(
            "{} chat_complete request: backend={}, model={}, messages={}",
            self.prefix,
            self.inner.info().id,
            options.preferred_model().unwrap_or("default"),
            messages.len()
        );

        let start = std::time::Instant::now();
        let result = self.inner.chat_complete(messages, options).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(text) => {
                tracing::debug!(
                    "{} chat_complete success: chars={}, elapsed={:?}",
                    self.prefix,
                    text.chars().count(),
                    elapsed
                );
            }
            Err(e) => {
                tracing::error!(
                    "{} chat_complete error: {}, elapsed={:?}",
                    self.prefix,
                    e,
                    elapsed
                );
            }
        }

        result
    }
}

#[async_trait]
impl<B: ChatBackend> ChatBackend for LoggingBackend<B> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Flaky {
        fail: bool,
    }

    #[async_trait]
    impl ChatBackend for Flaky {
        fn info(&self) -> Arc<BackendInfo> {
            BackendInfo::new("flaky", "Flaky")
        }

        async fn chat_complete(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<String, LmError> {
            if self.fail {
                Err(LmError::backend("boom"))
            } else {
                Ok("ok".to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_logging_is_transparent() {
        let layer = LoggingLayer::with_prefix("[test]");
        let messages = [ChatMessage::user("hi")];

        let ok = layer.layer(Flaky { fail: false });
        assert_eq!(ok.info().id, "flaky");
        assert_eq!(
            ok.chat_complete(&messages, &ChatOptions::new()).await.unwrap(),
            "ok"
        );

        let failing = layer.layer(Flaky { fail: true });
        let err = failing
            .chat_complete(&messages, &ChatOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LmError::Backend(_)));
    }
}
