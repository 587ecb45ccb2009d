//! Azure OpenAI chat backend.
//!
//! Request and response bodies use the async-openai wire types. The call is
//! made with reqwest so that every request can carry a fresh bearer token
//! from a [`TokenCredential`].

use crate::credential::TokenCredential;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
};
use async_trait::async_trait;
use lmcheck_core::backend::ChatBackend;
use lmcheck_core::error::LmError;
use lmcheck_core::types::*;
use std::sync::Arc;

/// Token scope for Azure Cognitive Services.
pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

/// Chat backend for an Azure OpenAI deployment.
#[derive(Clone)]
pub struct AzureOpenAiBackend {
    client: reqwest::Client,
    endpoint: String,
    api_version: String,
    deployment: String,
    credential: Arc<dyn TokenCredential>,
    info: Arc<BackendInfo>,
}

impl std::fmt::Debug for AzureOpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureOpenAiBackend")
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("deployment", &self.deployment)
            .finish()
    }
}

impl AzureOpenAiBackend {
    /// Create a builder
    pub fn builder() -> AzureOpenAiBuilder {
        AzureOpenAiBuilder::default()
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    /// Chat completions URL, without the `api-version` query
    pub fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions",
            self.endpoint.trim_end_matches('/'),
            self.deployment
        )
    }

    /// Convert our ChatMessage to OpenAI's ChatCompletionRequestMessage
    fn convert_message(msg: &ChatMessage) -> Result<ChatCompletionRequestMessage, LmError> {
        match msg.role {
            Role::Assistant => {
                let msg = ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content.clone())
                    .build()
                    .map_err(|e| {
                        LmError::backend(format!("Failed to build assistant message: {}", e))
                    })?;
                Ok(ChatCompletionRequestMessage::Assistant(msg))
            }
            role => {
                if role != Role::User {
                    tracing::warn!("unknown message role '{}', sending as user", role);
                }
                let msg = ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content.clone())
                    .build()
                    .map_err(|e| {
                        LmError::backend(format!("Failed to build user message: {}", e))
                    })?;
                Ok(ChatCompletionRequestMessage::User(msg))
            }
        }
    }

    /// Build CreateChatCompletionRequest from our messages and options
    fn build_request(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<CreateChatCompletionRequest, LmError> {
        let messages: Result<Vec<_>, _> = messages.iter().map(Self::convert_message).collect();
        let model = options
            .preferred_model()
            .unwrap_or(self.deployment.as_str());

        CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages?)
            .build()
            .map_err(|e| LmError::backend(format!("Failed to build request: {}", e)))
    }

    /// Text of the first choice
    fn first_content(response: CreateChatCompletionResponse) -> Result<String, LmError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LmError::empty_completion("response has no choices"))?;

        match choice.message.content {
            Some(content) if !content.is_empty() => Ok(content),
            _ => Err(LmError::empty_completion("first choice has no content")),
        }
    }
}

#[async_trait]
impl ChatBackend for AzureOpenAiBackend {
    fn info(&self) -> Arc<BackendInfo> {
        self.info.clone()
    }

    async fn chat_complete(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, LmError> {
        let request = self.build_request(messages, options)?;
        let token = self.credential.get_token(COGNITIVE_SERVICES_SCOPE).await?;

        let response = self
            .client
            .post(self.completions_url())
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(&token.token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Azure OpenAI returned {}: {}", status, body);
            return Err(match status {
                reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                    LmError::authentication(message)
                }
                _ => LmError::backend(message),
            });
        }

        let response: CreateChatCompletionResponse = response.json().await?;
        Self::first_content(response)
    }
}

/// Builder for the Azure OpenAI backend
#[derive(Default)]
pub struct AzureOpenAiBuilder {
    endpoint: Option<String>,
    api_version: Option<String>,
    deployment: Option<String>,
    credential: Option<Arc<dyn TokenCredential>>,
    client: Option<reqwest::Client>,
}

impl AzureOpenAiBuilder {
    /// Set the resource endpoint, e.g. `https://my-resource.openai.azure.com`
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    pub fn deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = Some(deployment.into());
        self
    }

    /// Set the token source
    pub fn credential(mut self, credential: Arc<dyn TokenCredential>) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Reuse an existing HTTP client
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Build the backend
    pub fn build(self) -> Result<AzureOpenAiBackend, LmError> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| LmError::configuration("endpoint is required"))?;
        let api_version = self
            .api_version
            .ok_or_else(|| LmError::configuration("apiVersion is required"))?;
        let deployment = self
            .deployment
            .ok_or_else(|| LmError::configuration("deployment is required"))?;
        let credential = self
            .credential
            .ok_or_else(|| LmError::configuration("credential is required"))?;

        Ok(AzureOpenAiBackend {
            client: self.client.unwrap_or_default(),
            info: BackendInfo::new("azure-openai", format!("Azure OpenAI ({})", deployment)),
            endpoint,
            api_version,
            deployment,
            credential,
        })
    }
}
