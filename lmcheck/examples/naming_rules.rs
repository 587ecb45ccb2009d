//! Naming-rule checks against a scripted local backend.
//!
//! This demonstrates:
//! 1. Registering a local backend with the provider factory
//! 2. Stacking layers on the resolved backend
//! 3. Sharing one persistent response cache between rules
//! 4. Queueing checks with callbacks and awaiting checks with handles
//!
//! The backend answers like a chatty model would: prose around fenced,
//! slightly broken JSON. Run it twice to see the second run served from the
//! cache file.

use async_trait::async_trait;
use lmcheck::prelude::*;
use lmcheck::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Property handed to the model
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenameData {
    model_name: String,
    original_name: String,
    description: String,
}

impl RenameData {
    fn new(model_name: &str, original_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            original_name: original_name.to_string(),
            description: format!("property '{}' of model '{}'", original_name, model_name),
        }
    }
}

impl CheckPayload for RenameData {
    fn subject(&self) -> String {
        format!("{}.{}", self.model_name, self.original_name)
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct RenameCheck {
    /// Indicates if the name needs to be changed
    rename_needed: bool,
    /// The exact original name that was checked
    original_name: String,
    /// Suggested names, most preferred first, 3 at most
    suggested_names: Vec<String>,
}

/// Pretends to be a model by pattern-matching on the property name.
#[derive(Debug)]
struct ScriptedModel;

#[async_trait]
impl ChatBackend for ScriptedModel {
    fn info(&self) -> Arc<BackendInfo> {
        BackendInfo::new("scripted", "Scripted model")
    }

    async fn chat_complete(
        &self,
        messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> std::result::Result<String, LmError> {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let rule = messages.first().map(|m| m.content.as_str()).unwrap_or_default();
        let payload: serde_json::Value =
            serde_json::from_str(&messages[messages.len() - 2].content)?;
        let name = payload["originalName"].as_str().unwrap_or_default();

        let suggestion = if rule.contains("boolean") {
            (!name.starts_with("Is") && !name.starts_with("Has")).then(|| format!("Is{}", name))
        } else {
            (!name.ends_with("InSeconds")).then(|| format!("{}InSeconds", name))
        };

        Ok(match suggestion {
            Some(suggested) => format!(
                "Sure, here is my analysis:\n```json\n{{type: 'content', renameNeeded: true, originalName: '{}', suggestedNames: ['{}',],}}\n```",
                name, suggested
            ),
            None => format!(
                "{{\"type\": \"content\", \"renameNeeded\": false, \"originalName\": \"{}\", \"suggestedNames\": []}}",
                name
            ),
        })
    }
}

fn report(rule: &'static str, data: &RenameData) -> impl FnOnce(RenameCheck) + Send + 'static {
    let subject = data.subject();
    move |check| {
        if check.rename_needed {
            println!(
                "[{}] '{}' should be renamed. Suggested names: {}",
                rule,
                subject,
                check.suggested_names.join(", ")
            );
        } else {
            println!("[{}] '{}' is fine", rule, subject);
        }
    }
}

fn report_error(rule: &'static str, data: &RenameData) -> impl FnOnce(CheckError) + Send + 'static {
    let subject = data.subject();
    move |e| match e {
        CheckError::Unavailable { first_report: false } => {}
        e => eprintln!("[{}] could not check '{}': {}", rule, subject, e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let factory = ProviderFactory::new().with_local(ScriptedModel);
    let backend = factory
        .resolve_str("type=local")
        .ok_or_else(|| anyhow::anyhow!("language model backend is not available"))?;

    let cache_path = std::env::temp_dir().join("lmcheck-naming-rules.cache");
    let invoker = Invoker::builder(backend)
        .layer(ConcurrencyLimitLayer::new(4))
        .layer(LoggingLayer::new())
        .cache(Arc::new(ResponseCache::with_path(&cache_path)))
        .finish();

    let options = ChatOptions::new().with_model_preference("gpt-4o");

    let boolean_rule = RuleChecker::<RenameData, RenameCheck>::builder("boolean-property")
        .message(ChatMessage::user(
            "Check the given boolean property name. It should start with a verb like 'Is', 'Has' or 'Can' and describe the property well.",
        ))
        .options(options.clone())
        .retry_count(2)
        .max_concurrency(2)
        .finish(Some(invoker.clone()))?;

    let duration_rule = RuleChecker::<RenameData, RenameCheck>::builder("duration-with-unit")
        .message(ChatMessage::user(
            "Check the given property name. If it represents a time interval or duration, the name MUST contain the unit.",
        ))
        .options(options)
        .retry_count(2)
        .max_concurrency(2)
        .finish(Some(invoker))?;

    for name in ["enabled", "IsPublic", "HasChildren", "readOnly"] {
        let data = RenameData::new("Widget", name);
        boolean_rule.queue(
            data.clone(),
            report("boolean-property", &data),
            report_error("boolean-property", &data),
        );
    }

    let handles: Vec<_> = ["pollInterval", "retentionInSeconds"]
        .into_iter()
        .map(|name| duration_rule.submit(RenameData::new("Widget", name)))
        .collect();

    for handle in handles {
        match handle.wait().await {
            Ok(check) => println!(
                "[duration-with-unit] '{}' rename needed: {}",
                check.original_name, check.rename_needed
            ),
            Err(e) => eprintln!("[duration-with-unit] check failed: {}", e),
        }
    }

    boolean_rule.finish().await;
    duration_rule.finish().await;

    println!("cache written to {}", cache_path.display());
    Ok(())
}
