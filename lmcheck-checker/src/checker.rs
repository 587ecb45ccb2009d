//! Rule checker implementation.

use crate::task::{CheckError, CheckHandle, CheckPayload, CheckTask, Reply};
use lmcheck_core::error::LmError;
use lmcheck_core::runtime::Invoker;
use lmcheck_core::schema::ResponseSchema;
use lmcheck_core::types::*;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// Attempts per check unless configured otherwise.
pub const DEFAULT_RETRY_COUNT: u32 = 3;
/// Checks in flight per rule unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Builder for a [`RuleChecker`].
///
/// # Example
///
/// ```ignore
/// let checker = RuleChecker::<RenameData, RenameCheck>::builder("duration-with-unit")
///     .message(ChatMessage::user("Check the given property names ..."))
///     .options(ChatOptions::new().with_model_preference("gpt-4o"))
///     .retry_count(2)
///     .finish(Some(invoker))?;
/// ```
pub struct RuleCheckerBuilder<P, T> {
    name: String,
    template: Vec<ChatMessage>,
    options: ChatOptions,
    schema: Option<ResponseSchema>,
    retry_count: u32,
    max_concurrency: usize,
    _marker: PhantomData<fn() -> (P, T)>,
}

impl<P, T> RuleCheckerBuilder<P, T>
where
    P: CheckPayload,
    T: JsonSchema + DeserializeOwned + Send + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: Vec::new(),
            options: ChatOptions::default(),
            schema: None,
            retry_count: DEFAULT_RETRY_COUNT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            _marker: PhantomData,
        }
    }

    /// Replace the prompt template
    pub fn template(mut self, template: Vec<ChatMessage>) -> Self {
        self.template = template;
        self
    }

    /// Append a message to the prompt template
    pub fn message(mut self, message: ChatMessage) -> Self {
        self.template.push(message);
        self
    }

    pub fn options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a hand-written schema instead of the one derived from `T`
    pub fn schema(mut self, schema: ResponseSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Attempts per check
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Checks allowed in flight at once (at least one)
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Finish building and start the dispatcher.
    ///
    /// Without an invoker every check is reported as unavailable. Must be
    /// called from within a Tokio runtime.
    pub fn finish(self, invoker: Option<Invoker>) -> Result<RuleChecker<P, T>, LmError> {
        let schema = match self.schema {
            Some(schema) => schema,
            None => ResponseSchema::of::<T>()?,
        };
        if invoker.is_none() {
            tracing::warn!(
                "rule '{}' has no language model backend, checks will be reported as unavailable",
                self.name
            );
        }

        let rule = Arc::new(Rule {
            name: self.name.clone(),
            template: self.template,
            options: self.options,
            schema,
            retry_count: self.retry_count,
            invoker,
            unavailable_reported: AtomicBool::new(false),
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(rule, receiver, self.max_concurrency));

        Ok(RuleChecker {
            name: self.name,
            sender,
            dispatcher,
        })
    }
}

/// Queueing façade for one rule.
///
/// Queued checks run concurrently up to the configured bound; results are
/// delivered in completion order, not queue order.
pub struct RuleChecker<P, T> {
    name: String,
    sender: mpsc::UnboundedSender<CheckTask<P, T>>,
    dispatcher: JoinHandle<()>,
}

impl<P, T> std::fmt::Debug for RuleChecker<P, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleChecker")
            .field("name", &self.name)
            .finish()
    }
}

impl<P, T> RuleChecker<P, T>
where
    P: CheckPayload,
    T: JsonSchema + DeserializeOwned + Send + 'static,
{
    /// Create a new builder
    pub fn builder(name: impl Into<String>) -> RuleCheckerBuilder<P, T> {
        RuleCheckerBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a check without waiting for it.
    ///
    /// Exactly one of `on_success` and `on_error` is called, on a runtime
    /// worker, once the check completes.
    pub fn queue<S, E>(&self, payload: P, on_success: S, on_error: E)
    where
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(CheckError) + Send + 'static,
    {
        let reply = Reply::Callbacks {
            on_success: Box::new(on_success),
            on_error: Box::new(on_error),
        };
        self.enqueue(CheckTask::new(payload, reply));
    }

    /// Queue a check and get a handle to await its result
    pub fn submit(&self, payload: P) -> CheckHandle<T> {
        let (tx, rx) = oneshot::channel();
        let task = CheckTask::new(payload, Reply::Channel(tx));
        let handle = CheckHandle::new(task.id, rx);
        self.enqueue(task);
        handle
    }

    /// Stop accepting checks and wait until every queued check has finished.
    pub async fn finish(self) {
        drop(self.sender);
        if let Err(e) = self.dispatcher.await {
            tracing::error!("dispatcher of rule '{}' failed: {}", self.name, e);
        }
    }

    fn enqueue(&self, task: CheckTask<P, T>) {
        tracing::debug!("queued check {} for rule '{}'", task.id, self.name);
        if let Err(mpsc::error::SendError(task)) = self.sender.send(task) {
            tracing::error!(
                "rule '{}' is no longer running, dropping check {}",
                self.name,
                task.id
            );
            task.reply.send(Err(CheckError::Cancelled));
        }
    }
}

/// Configuration shared by every check of a rule.
struct Rule {
    name: String,
    template: Vec<ChatMessage>,
    options: ChatOptions,
    schema: ResponseSchema,
    retry_count: u32,
    invoker: Option<Invoker>,
    unavailable_reported: AtomicBool,
}

impl Rule {
    fn prompt<P: CheckPayload>(&self, payload: &P) -> Result<Vec<ChatMessage>, LmError> {
        let mut messages = Vec::with_capacity(self.template.len() + 1);
        messages.extend_from_slice(&self.template);
        messages.push(ChatMessage::user(serde_json::to_string_pretty(payload)?));
        Ok(messages)
    }

    fn unavailable(&self) -> CheckError {
        let first_report = !self.unavailable_reported.swap(true, Ordering::SeqCst);
        CheckError::Unavailable { first_report }
    }

    async fn check<P, T>(&self, payload: &P) -> Result<T, CheckError>
    where
        P: CheckPayload,
        T: DeserializeOwned,
    {
        let Some(invoker) = &self.invoker else {
            return Err(self.unavailable());
        };

        let messages = match self.prompt(payload) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!("failed to build prompt for rule '{}': {}", self.name, e);
                return Err(self.unavailable());
            }
        };
        let caller_key = format!("{}.{}", self.name, payload.subject());

        match invoker
            .invoke_with_retry::<T>(
                &caller_key,
                &messages,
                &self.options,
                &self.schema,
                self.retry_count,
            )
            .await
        {
            Outcome::Content(value) => Ok(value),
            Outcome::Error(error) => Err(CheckError::Model(error)),
            Outcome::Unavailable => Err(self.unavailable()),
        }
    }

    async fn run<P, T>(&self, task: CheckTask<P, T>)
    where
        P: CheckPayload,
        T: DeserializeOwned + Send + 'static,
    {
        let CheckTask { id, payload, reply } = task;
        match reply {
            Reply::Channel(mut tx) => {
                tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!("check {} abandoned by its caller", id);
                    }
                    result = self.check::<P, T>(&payload) => {
                        let _ = tx.send(result);
                    }
                }
            }
            reply => {
                let result = self.check::<P, T>(&payload).await;
                reply.send(result);
            }
        }
        tracing::debug!("check {} for rule '{}' done", id, self.name);
    }
}

async fn dispatch<P, T>(
    rule: Arc<Rule>,
    mut receiver: mpsc::UnboundedReceiver<CheckTask<P, T>>,
    max_concurrency: usize,
) where
    P: CheckPayload,
    T: DeserializeOwned + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency));
    let mut running = JoinSet::new();

    while let Some(task) = receiver.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::error!("concurrency limiter of rule '{}' closed: {}", rule.name, e);
                task.reply.send(Err(CheckError::Cancelled));
                break;
            }
        };

        let task_rule = rule.clone();
        running.spawn(async move {
            let _permit = permit;
            task_rule.run(task).await;
        });

        while let Some(result) = running.try_join_next() {
            log_join_result(&rule.name, result);
        }
    }

    while let Some(result) = running.join_next().await {
        log_join_result(&rule.name, result);
    }
}

fn log_join_result(rule: &str, result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!("check task of rule '{}' failed: {}", rule, e);
    }
}
