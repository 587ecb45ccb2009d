//! # lmcheck providers
//!
//! Backend resolution from connection descriptors and the Azure OpenAI chat
//! backend.

pub mod azure;
pub mod credential;
pub mod factory;

// Re-exports
pub use azure::{AzureOpenAiBackend, AzureOpenAiBuilder, COGNITIVE_SERVICES_SCOPE};
pub use credential::{
    AccessToken, IdentitySource, ManagedIdentityCredential, StaticTokenCredential,
    TokenCredential,
};
pub use factory::{ProviderFactory, CLOUD_KIND, CONNECTION_STRING_ENV, LOCAL_KIND};
