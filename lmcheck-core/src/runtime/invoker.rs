//! Invoker implementation.
//!
//! The [`Invoker`] is the explicit context object of a session: it owns the
//! backend, the shared response cache and the retry policy, and turns a
//! question into a [`ResponseEnvelope`] or an [`Outcome`].

use crate::backend::ChatBackend;
use crate::cache::ResponseCache;
use crate::error::LmError;
use crate::extract::extract_json;
use crate::layer::Layer;
use crate::runtime::retry::RetryPolicy;
use crate::schema::{ResponseSchema, CONTENT_TYPE, ERROR_TYPE};
use crate::types::*;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Longest model output echoed into logs and errors.
const PREVIEW_CHARS: usize = 300;

/// Builder for composing an invoker from a backend, layers and a cache.
///
/// # Example
///
/// ```ignore
/// let invoker = Invoker::builder(backend)
///     .layer(LoggingLayer::new())
///     .cache(Arc::new(ResponseCache::with_path("lm.cache")))
///     .retry_policy(RetryPolicy::new().with_max_attempts(2))
///     .finish();
/// ```
pub struct InvokerBuilder<B> {
    backend: B,
    cache: Option<Arc<ResponseCache>>,
    retry_policy: RetryPolicy,
}

impl<B: ChatBackend> InvokerBuilder<B> {
    /// Create a new builder with a backend
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            cache: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Add a layer to wrap the backend
    pub fn layer<L>(self, layer: L) -> InvokerBuilder<L::LayeredBackend>
    where
        L: Layer<B>,
    {
        InvokerBuilder {
            backend: layer.layer(self.backend),
            cache: self.cache,
            retry_policy: self.retry_policy,
        }
    }

    /// Share a response cache. Without one, an in-memory cache is created.
    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the retry policy used by [`Invoker::ask`]
    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Finish building and create an Invoker
    pub fn finish(self) -> Invoker {
        Invoker {
            backend: Arc::new(self.backend),
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(ResponseCache::in_memory())),
            retry_policy: self.retry_policy,
        }
    }
}

/// Resilient invocation pipeline.
///
/// Cheap to clone; clones share the backend and the cache.
#[derive(Debug, Clone)]
pub struct Invoker {
    backend: Arc<dyn ChatBackend>,
    cache: Arc<ResponseCache>,
    retry_policy: RetryPolicy,
}

impl Invoker {
    /// Create a new builder
    pub fn builder<B: ChatBackend>(backend: B) -> InvokerBuilder<B> {
        InvokerBuilder::new(backend)
    }

    /// Get backend information
    pub fn info(&self) -> Arc<BackendInfo> {
        self.backend.info()
    }

    /// The shared response cache
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Ask the model once.
    ///
    /// A cached reply for `(caller_key, messages)` is returned without
    /// touching the backend. Otherwise the output contract is appended, the
    /// backend is called, and its text is recovered into JSON and validated.
    /// Only `content` replies are cached. Every `Err` is a failure worth
    /// retrying.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        caller_key: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
        schema: &ResponseSchema,
    ) -> Result<ResponseEnvelope<T>, LmError> {
        if let Some(cached) = self.cache.get(caller_key, messages).await {
            match serde_json::from_value::<ResponseEnvelope<T>>(cached) {
                Ok(envelope) => {
                    tracing::debug!("using cached result for {}", caller_key);
                    return Ok(envelope);
                }
                Err(e) => {
                    tracing::warn!("ignoring stale cache entry for {}: {}", caller_key, e);
                }
            }
        }

        let mut request = Vec::with_capacity(messages.len() + 1);
        request.extend_from_slice(messages);
        request.push(schema.instruction()?);

        let text = self.backend.chat_complete(&request, options).await?;
        if text.trim().is_empty() {
            return Err(LmError::empty_completion(format!(
                "backend '{}' returned no text",
                self.backend.info().id
            )));
        }

        let value = extract_json(&text).ok_or_else(|| LmError::extraction(preview(&text)))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                LmError::unexpected_type(format!("reply has no 'type' field: {}", preview(&text)))
            })?;

        match kind.as_str() {
            ERROR_TYPE => {
                schema.validate_error(&value)?;
                let error: ErrorResponse = serde_json::from_value(value)?;
                tracing::debug!("model reported an error for {}: {}", caller_key, error.error);
                Ok(ResponseEnvelope::Error(error))
            }
            CONTENT_TYPE => {
                schema.validate_content(&value)?;
                let envelope = serde_json::from_value::<ResponseEnvelope<T>>(value.clone())?;
                if let Err(e) = self.cache.set(caller_key, messages, value).await {
                    tracing::warn!("failed to persist cache entry for {}: {}", caller_key, e);
                }
                Ok(envelope)
            }
            other => Err(LmError::unexpected_type(format!(
                "expected 'content' or 'error', got '{}'",
                other
            ))),
        }
    }

    /// Ask the model up to `retry_count` times.
    ///
    /// Stops at the first content or well-formed error reply. Any failure,
    /// including one the backend raises, uses up an attempt. Exhausting the
    /// attempts yields [`Outcome::Unavailable`], which callers should keep
    /// apart from a model-reported error.
    pub async fn invoke_with_retry<T: DeserializeOwned>(
        &self,
        caller_key: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
        schema: &ResponseSchema,
        retry_count: u32,
    ) -> Outcome<T> {
        for attempt in 0..retry_count {
            match self.invoke(caller_key, messages, options, schema).await {
                Ok(envelope) => return envelope.into(),
                Err(e) => {
                    tracing::warn!(
                        "attempt {}/{} for {} failed: {}",
                        attempt + 1,
                        retry_count,
                        caller_key,
                        e
                    );
                    let delay = self.retry_policy.delay_after(attempt);
                    if attempt + 1 < retry_count && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        tracing::error!(
            "all {} attempts to ask the language model failed for {}",
            retry_count,
            caller_key
        );
        Outcome::Unavailable
    }

    /// [`Invoker::invoke_with_retry`] using the configured policy's attempt count
    pub async fn ask<T: DeserializeOwned>(
        &self,
        caller_key: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
        schema: &ResponseSchema,
    ) -> Outcome<T> {
        self.invoke_with_retry(
            caller_key,
            messages,
            options,
            schema,
            self.retry_policy.max_attempts(),
        )
        .await
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Deserialize, schemars::JsonSchema)]
    struct RenameCheck {
        rename_needed: bool,
        suggested_names: Vec<String>,
    }

    /// Replays scripted replies and counts calls.
    #[derive(Debug, Default)]
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, String>>>,
        fallback: String,
        calls: AtomicUsize,
        last_request: Mutex<Vec<ChatMessage>>,
    }

    impl ScriptedBackend {
        fn always(text: &str) -> Self {
            Self {
                fallback: text.to_string(),
                ..Default::default()
            }
        }

        fn scripted(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        fn info(&self) -> Arc<BackendInfo> {
            BackendInfo::new("scripted", "Scripted")
        }

        async fn chat_complete(
            &self,
            messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<String, LmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = messages.to_vec();
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(e)) => Err(LmError::backend(e)),
                None => Ok(self.fallback.clone()),
            }
        }
    }

    fn setup(backend: ScriptedBackend) -> (Arc<ScriptedBackend>, Invoker) {
        let backend = Arc::new(backend);
        let invoker = Invoker::builder(backend.clone()).finish();
        (backend, invoker)
    }

    fn question() -> Vec<ChatMessage> {
        vec![ChatMessage::user("Check boolean property name 'enabled'")]
    }

    fn schema() -> ResponseSchema {
        ResponseSchema::of::<RenameCheck>().unwrap()
    }

    const CONTENT: &str =
        r#"{"type":"content","rename_needed":true,"suggested_names":["IsEnabled"]}"#;

    #[tokio::test]
    async fn test_content_reply_is_returned_and_cached() {
        let (backend, invoker) = setup(ScriptedBackend::always(CONTENT));

        let result: ResponseEnvelope<RenameCheck> = invoker
            .invoke("rule.enabled", &question(), &ChatOptions::new(), &schema())
            .await
            .unwrap();

        let expected = RenameCheck {
            rename_needed: true,
            suggested_names: vec!["IsEnabled".to_string()],
        };
        assert_eq!(result, ResponseEnvelope::Content(expected));
        assert_eq!(
            invoker.cache().get("rule.enabled", &question()).await,
            Some(serde_json::from_str::<Value>(CONTENT).unwrap())
        );
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_instruction_is_appended_but_not_fingerprinted() {
        let (backend, invoker) = setup(ScriptedBackend::always(CONTENT));

        let _: ResponseEnvelope<RenameCheck> = invoker
            .invoke("rule.enabled", &question(), &ChatOptions::new(), &schema())
            .await
            .unwrap();

        let sent = backend.last_request.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], question()[0]);
        assert_eq!(sent[1].role, Role::User);
        assert!(sent[1].content.contains("json schema"));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_backend() {
        let (backend, invoker) = setup(ScriptedBackend::always("unused"));
        let cached = json!({"type": "content", "rename_needed": false, "suggested_names": []});
        invoker
            .cache()
            .set("rule.enabled", &question(), cached)
            .await
            .unwrap();

        let outcome: Outcome<RenameCheck> = invoker
            .invoke_with_retry("rule.enabled", &question(), &ChatOptions::new(), &schema(), 3)
            .await;

        assert_eq!(
            outcome,
            Outcome::Content(RenameCheck {
                rename_needed: false,
                suggested_names: vec![],
            })
        );
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_error_reply_is_not_cached() {
        let (backend, invoker) =
            setup(ScriptedBackend::always(r#"{"type":"error","error":"not a property"}"#));

        for _ in 0..2 {
            let outcome: Outcome<RenameCheck> = invoker
                .invoke_with_retry("rule.enabled", &question(), &ChatOptions::new(), &schema(), 3)
                .await;
            assert_eq!(outcome, Outcome::Error(ErrorResponse::new("not a property")));
        }

        assert_eq!(backend.calls(), 2);
        assert_eq!(invoker.cache().get("rule.enabled", &question()).await, None);
    }

    #[tokio::test]
    async fn test_unparsable_reply_exhausts_retries() {
        let (backend, invoker) = setup(ScriptedBackend::always("I am not sure what you mean."));

        let outcome: Outcome<RenameCheck> = invoker
            .invoke_with_retry("rule.enabled", &question(), &ChatOptions::new(), &schema(), 3)
            .await;

        assert_eq!(outcome, Outcome::Unavailable);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_until_success() {
        let (backend, invoker) = setup(ScriptedBackend::scripted(vec![
            Err("connection reset"),
            Ok(r#"{"type":"content","rename_needed":"maybe","suggested_names":[]}"#),
            Ok(r#"{"type":"verdict"}"#),
            Ok(CONTENT),
        ]));

        let outcome: Outcome<RenameCheck> = invoker
            .invoke_with_retry("rule.enabled", &question(), &ChatOptions::new(), &schema(), 5)
            .await;

        assert!(matches!(outcome, Outcome::Content(ref c) if c.rename_needed));
        assert_eq!(backend.calls(), 4);
    }

    /// Fails its first call with an I/O error, then answers.
    #[derive(Debug, Default)]
    struct FlakyIo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatBackend for FlakyIo {
        fn info(&self) -> Arc<BackendInfo> {
            BackendInfo::new("flaky-io", "Flaky I/O")
        }

        async fn chat_complete(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<String, LmError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let err =
                    std::io::Error::new(std::io::ErrorKind::Interrupted, "socket interrupted");
                return Err(err.into());
            }
            Ok(CONTENT.to_string())
        }
    }

    #[tokio::test]
    async fn test_any_backend_failure_is_retried() {
        let backend = Arc::new(FlakyIo::default());
        let invoker = Invoker::builder(backend.clone()).finish();

        let outcome: Outcome<RenameCheck> = invoker
            .invoke_with_retry("rule.enabled", &question(), &ChatOptions::new(), &schema(), 3)
            .await;

        assert!(matches!(outcome, Outcome::Content(ref c) if c.rename_needed));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_type_is_retryable() {
        let (_, invoker) = setup(ScriptedBackend::always(r#"{"rename_needed":true}"#));

        let err = invoker
            .invoke::<RenameCheck>("rule.enabled", &question(), &ChatOptions::new(), &schema())
            .await
            .unwrap_err();

        assert!(matches!(err, LmError::UnexpectedType(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_completion_is_an_error() {
        let (_, invoker) = setup(ScriptedBackend::always("   "));

        let err = invoker
            .invoke::<RenameCheck>("rule.enabled", &question(), &ChatOptions::new(), &schema())
            .await
            .unwrap_err();

        assert!(matches!(err, LmError::EmptyCompletion(_)));
    }

    #[tokio::test]
    async fn test_zero_retry_count_never_calls_backend() {
        let (backend, invoker) = setup(ScriptedBackend::always(CONTENT));

        let outcome: Outcome<RenameCheck> = invoker
            .invoke_with_retry("rule.enabled", &question(), &ChatOptions::new(), &schema(), 0)
            .await;

        assert!(outcome.is_unavailable());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ask_uses_policy_attempts_and_backoff() {
        let backend = Arc::new(ScriptedBackend::always("nope"));
        let invoker = Invoker::builder(backend.clone())
            .retry_policy(
                RetryPolicy::new()
                    .with_max_attempts(2)
                    .with_initial_delay(std::time::Duration::from_secs(1)),
            )
            .finish();

        let started = tokio::time::Instant::now();
        let outcome: Outcome<RenameCheck> = invoker
            .ask("rule.enabled", &question(), &ChatOptions::new(), &schema())
            .await;

        assert!(outcome.is_unavailable());
        assert_eq!(backend.calls(), 2);
        assert!(started.elapsed() >= std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(PREVIEW_CHARS + 10);
        assert!(preview(&long).ends_with("..."));
        assert_eq!(preview("short"), "short");
    }
}
