//! Backend resolution from connection descriptors.

use crate::azure::AzureOpenAiBackend;
use crate::credential::{ManagedIdentityCredential, TokenCredential};
use lmcheck_core::backend::ChatBackend;
use lmcheck_core::descriptor::ConnectionDescriptor;
use lmcheck_core::error::LmError;
use std::sync::Arc;

/// Environment variable holding the connection descriptor.
pub const CONNECTION_STRING_ENV: &str = "LM_PROVIDER_CONNECTION_STRING";

/// Backend kind served by a locally registered backend.
pub const LOCAL_KIND: &str = "local";
/// Backend kind served by Azure OpenAI.
pub const CLOUD_KIND: &str = "cloud";

/// The only `serviceType` the cloud backend speaks.
const OPENAI_SERVICE_TYPE: &str = "openai";
const CLOUD_REQUIRED_KEYS: [&str; 4] = ["serviceType", "endpoint", "apiVersion", "deployment"];

/// Maps connection descriptors to backends.
///
/// Resolve once per session and share the resulting backend.
///
/// # Example
///
/// ```ignore
/// let factory = ProviderFactory::new().with_local(MyBackend::new());
/// let backend = factory.resolve_from_env();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProviderFactory {
    local: Option<Arc<dyn ChatBackend>>,
    credential: Option<Arc<dyn TokenCredential>>,
}

impl ProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the backend served for `type=local`
    pub fn with_local(mut self, backend: impl ChatBackend) -> Self {
        self.local = Some(Arc::new(backend));
        self
    }

    /// Use `credential` for cloud backends instead of the managed identity
    pub fn with_credential(mut self, credential: Arc<dyn TokenCredential>) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Resolve a backend, reporting why resolution failed.
    pub fn try_resolve(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn ChatBackend>, LmError> {
        match descriptor.kind() {
            LOCAL_KIND => self.local.clone().ok_or_else(|| {
                LmError::configuration("no local backend is registered with the factory")
            }),
            CLOUD_KIND => self.cloud_backend(descriptor),
            other => Err(LmError::unsupported_backend(other)),
        }
    }

    /// Resolve a backend, logging the failure and returning `None` when the
    /// descriptor cannot be served.
    pub fn resolve(&self, descriptor: &ConnectionDescriptor) -> Option<Arc<dyn ChatBackend>> {
        match self.try_resolve(descriptor) {
            Ok(backend) => {
                tracing::debug!("resolved backend '{}'", backend.info().id);
                Some(backend)
            }
            Err(e) if descriptor.kind() == LOCAL_KIND => {
                tracing::warn!("local language model backend unavailable: {}", e);
                None
            }
            Err(e) => {
                tracing::error!("failed to resolve language model backend: {}", e);
                None
            }
        }
    }

    /// Parse `connection_string` and resolve it
    pub fn resolve_str(&self, connection_string: &str) -> Option<Arc<dyn ChatBackend>> {
        match ConnectionDescriptor::parse(connection_string) {
            Ok(descriptor) => self.resolve(&descriptor),
            Err(e) => {
                tracing::error!("{}", e);
                None
            }
        }
    }

    /// Resolve the descriptor in `LM_PROVIDER_CONNECTION_STRING`, falling
    /// back to `type=local` when it is unset.
    pub fn resolve_from_env(&self) -> Option<Arc<dyn ChatBackend>> {
        let connection_string =
            connection_string_or_local(std::env::var(CONNECTION_STRING_ENV).ok());
        self.resolve_str(&connection_string)
    }

    fn cloud_backend(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn ChatBackend>, LmError> {
        let mut problems: Vec<String> = descriptor
            .missing(&CLOUD_REQUIRED_KEYS)
            .into_iter()
            .map(|key| format!("missing '{}'", key))
            .collect();
        if let Some(service_type) = descriptor.get("serviceType") {
            if service_type != OPENAI_SERVICE_TYPE {
                problems.push(format!(
                    "unsupported serviceType '{}', expected '{}'",
                    service_type, OPENAI_SERVICE_TYPE
                ));
            }
        }
        if !problems.is_empty() {
            return Err(LmError::configuration(format!(
                "invalid cloud connection descriptor: {}",
                problems.join(", ")
            )));
        }

        let credential = match &self.credential {
            Some(credential) => credential.clone(),
            None => {
                let mut identity = ManagedIdentityCredential::new();
                if let Some(client_id) = descriptor.get("clientId") {
                    identity = identity.with_client_id(client_id);
                }
                Arc::new(identity)
            }
        };

        let mut builder = AzureOpenAiBackend::builder().credential(credential);
        if let Some(endpoint) = descriptor.get("endpoint") {
            builder = builder.endpoint(endpoint);
        }
        if let Some(api_version) = descriptor.get("apiVersion") {
            builder = builder.api_version(api_version);
        }
        if let Some(deployment) = descriptor.get("deployment") {
            builder = builder.deployment(deployment);
        }

        Ok(Arc::new(builder.build()?))
    }
}

fn connection_string_or_local(value: Option<String>) -> String {
    match value {
        Some(value) if !value.trim().is_empty() => value,
        _ => {
            tracing::error!(
                "{} is not set, falling back to the local language model backend",
                CONNECTION_STRING_ENV
            );
            format!("type={}", LOCAL_KIND)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::StaticTokenCredential;
    use async_trait::async_trait;
    use lmcheck_core::types::*;

    #[derive(Debug)]
    struct Canned;

    #[async_trait]
    impl ChatBackend for Canned {
        fn info(&self) -> Arc<BackendInfo> {
            BackendInfo::new("canned", "Canned")
        }

        async fn chat_complete(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<String, LmError> {
            Ok("{}".to_string())
        }
    }

    fn descriptor(s: &str) -> ConnectionDescriptor {
        ConnectionDescriptor::parse(s).unwrap()
    }

    fn cloud_factory() -> ProviderFactory {
        ProviderFactory::new().with_credential(Arc::new(StaticTokenCredential::new("t")))
    }

    #[test]
    fn test_local_backend_resolves_when_registered() {
        let factory = ProviderFactory::new().with_local(Canned);
        let backend = factory.resolve(&descriptor("type=local")).unwrap();
        assert_eq!(backend.info().id, "canned");
    }

    #[test]
    fn test_local_backend_missing_is_unavailable() {
        let factory = ProviderFactory::new();
        assert!(factory.resolve(&descriptor("type=local")).is_none());
        assert!(factory
            .try_resolve(&descriptor("type=local"))
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_unknown_kind_is_unavailable() {
        let err = ProviderFactory::new()
            .try_resolve(&descriptor("type=carrier-pigeon"))
            .unwrap_err();
        assert!(matches!(err, LmError::UnsupportedBackend(ref kind) if kind == "carrier-pigeon"));
    }

    #[test]
    fn test_cloud_backend_resolves() {
        let backend = cloud_factory()
            .resolve(&descriptor(
                "type=cloud;serviceType=openai;endpoint=https://x;apiVersion=v1;deployment=d",
            ))
            .unwrap();
        assert_eq!(backend.info().id, "azure-openai");
    }

    #[test]
    fn test_cloud_backend_missing_any_required_key_is_unavailable() {
        let full = [
            ("serviceType", "openai"),
            ("endpoint", "https://x"),
            ("apiVersion", "v1"),
            ("deployment", "d"),
        ];

        for skipped in 0..full.len() {
            let mut s = "type=cloud".to_string();
            for (i, (key, value)) in full.iter().enumerate() {
                if i != skipped {
                    s.push_str(&format!(";{}={}", key, value));
                }
            }

            let factory = cloud_factory();
            assert!(factory.resolve(&descriptor(&s)).is_none(), "{}", s);
            let err = factory.try_resolve(&descriptor(&s)).unwrap_err().to_string();
            assert!(err.contains(full[skipped].0), "{}", err);
        }
    }

    #[test]
    fn test_cloud_diagnostic_names_every_problem() {
        let err = cloud_factory()
            .try_resolve(&descriptor("type=cloud;serviceType=anthropic;endpoint=https://x"))
            .unwrap_err()
            .to_string();

        assert!(err.contains("apiVersion"));
        assert!(err.contains("deployment"));
        assert!(err.contains("anthropic"));
    }

    #[test]
    fn test_resolve_str_rejects_bad_descriptor() {
        let factory = ProviderFactory::new().with_local(Canned);
        assert!(factory.resolve_str("type=local;oops").is_none());
        assert!(factory.resolve_str("type=local").is_some());
    }

    #[test]
    fn test_connection_string_falls_back_to_local() {
        assert_eq!(connection_string_or_local(None), "type=local");
        assert_eq!(connection_string_or_local(Some("  ".to_string())), "type=local");
        assert_eq!(
            connection_string_or_local(Some("type=cloud".to_string())),
            "type=cloud"
        );
    }
}
