//! Single structured question against the backend named by the environment.
//!
//! Set `LM_PROVIDER_CONNECTION_STRING`, for example
//! `type=cloud;serviceType=openai;endpoint=https://my-resource.openai.azure.com;apiVersion=2024-02-01;deployment=gpt-4o`,
//! and run on a host with a managed identity that may call the deployment.

use lmcheck::prelude::*;
use lmcheck::schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct BooleanNameCheck {
    /// True unless the name already starts with a verb and describes the property well
    rename_needed: bool,
    /// Names starting with a verb like 'Is', 'Has' or 'Can', most preferred first
    suggested_names: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let backend = ProviderFactory::new()
        .resolve_from_env()
        .ok_or_else(|| {
            anyhow::anyhow!("set {} to a valid connection string", CONNECTION_STRING_ENV)
        })?;
    println!("Using backend: {}", backend.info().name);

    let invoker = Invoker::builder(backend)
        .layer(LoggingLayer::with_prefix("[azure]"))
        .cache(Arc::new(ResponseCache::with_path("lmcheck-azure.cache")))
        .retry_policy(
            RetryPolicy::new()
                .with_max_attempts(3)
                .with_initial_delay(Duration::from_millis(500)),
        )
        .finish();

    let schema = ResponseSchema::of::<BooleanNameCheck>()?;
    let messages = vec![
        ChatMessage::user("Check the given boolean property name. It should start with a verb."),
        ChatMessage::user("{\"originalName\": \"enabled\", \"description\": \"property 'enabled' of model 'Widget'\"}"),
    ];
    let options = ChatOptions::new().with_model_preference("gpt-4o");

    match invoker
        .ask::<BooleanNameCheck>("boolean-property.Widget.enabled", &messages, &options, &schema)
        .await
    {
        Outcome::Content(check) => println!("{:#?}", check),
        Outcome::Error(e) => println!("Model reported an error: {}", e.error),
        Outcome::Unavailable => println!("Language model is unavailable"),
    }

    Ok(())
}
