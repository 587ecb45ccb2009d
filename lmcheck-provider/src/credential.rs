//! Bearer-token credentials for cloud backends.
//!
//! [`ManagedIdentityCredential`] talks to the managed-identity endpoint of
//! the host: the App Service endpoint when `IDENTITY_ENDPOINT` and
//! `IDENTITY_HEADER` are set, the instance metadata service otherwise.
//! Tokens are cached until shortly before they expire.

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use lmcheck_core::error::LmError;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Instance metadata service token endpoint.
pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

/// Tokens this close to expiry are refreshed.
const EXPIRY_MARGIN: Duration = Duration::from_secs(300);
/// Lifetime assumed when the endpoint reports none.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

/// An access token and the moment it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: SystemTime,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: SystemTime) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Whether the token is still usable for at least `margin`
    pub fn is_fresh(&self, margin: Duration) -> bool {
        SystemTime::now() + margin < self.expires_at
    }
}

/// Source of bearer tokens for a scope.
#[async_trait]
pub trait TokenCredential: Send + Sync + Debug + 'static {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, LmError>;
}

/// A fixed token, for tests and for callers that manage tokens themselves.
#[derive(Debug, Clone)]
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _scope: &str) -> Result<AccessToken, LmError> {
        Ok(AccessToken::new(
            self.token.clone(),
            SystemTime::now() + DEFAULT_LIFETIME,
        ))
    }
}

/// Where managed-identity tokens come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    /// App Service / Functions identity endpoint
    AppService { endpoint: String, secret: String },
    /// Azure instance metadata service
    Imds { endpoint: String },
}

impl IdentitySource {
    /// Detect the source from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Detect the source using `lookup` to read variables
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        match (lookup("IDENTITY_ENDPOINT"), lookup("IDENTITY_HEADER")) {
            (Some(endpoint), Some(secret)) if !endpoint.is_empty() && !secret.is_empty() => {
                IdentitySource::AppService { endpoint, secret }
            }
            _ => IdentitySource::Imds {
                endpoint: IMDS_ENDPOINT.to_string(),
            },
        }
    }
}

#[derive(Debug)]
struct CachedToken {
    scope: String,
    token: AccessToken,
}

/// Managed-identity token provider.
#[derive(Debug)]
pub struct ManagedIdentityCredential {
    client: reqwest::Client,
    source: IdentitySource,
    client_id: Option<String>,
    cached: ArcSwapOption<CachedToken>,
}

impl ManagedIdentityCredential {
    /// System-assigned identity, endpoint detected from the environment
    pub fn new() -> Self {
        Self::with_source(IdentitySource::from_env())
    }

    pub fn with_source(source: IdentitySource) -> Self {
        Self {
            client: reqwest::Client::new(),
            source,
            client_id: None,
            cached: ArcSwapOption::empty(),
        }
    }

    /// Use a user-assigned identity
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn source(&self) -> &IdentitySource {
        &self.source
    }

    fn cached_token(&self, scope: &str) -> Option<AccessToken> {
        let cached = self.cached.load_full()?;
        (cached.scope == scope && cached.token.is_fresh(EXPIRY_MARGIN))
            .then(|| cached.token.clone())
    }

    async fn fetch_token(&self, scope: &str) -> Result<AccessToken, LmError> {
        let resource = scope_to_resource(scope);
        let mut query = vec![("resource", resource)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let request = match &self.source {
            IdentitySource::AppService { endpoint, secret } => self
                .client
                .get(endpoint)
                .query(&[("api-version", APP_SERVICE_API_VERSION)])
                .header("X-IDENTITY-HEADER", secret),
            IdentitySource::Imds { endpoint } => self
                .client
                .get(endpoint)
                .query(&[("api-version", IMDS_API_VERSION)])
                .header("Metadata", "true"),
        };

        let response = request.query(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LmError::authentication(format!(
                "managed identity endpoint returned {}: {}",
                status, body
            )));
        }

        let body: TokenResponse = response.json().await?;
        Ok(body.into_access_token(SystemTime::now()))
    }
}

impl Default for ManagedIdentityCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, LmError> {
        if let Some(token) = self.cached_token(scope) {
            return Ok(token);
        }

        tracing::debug!("requesting managed identity token for {}", scope);
        let token = self.fetch_token(scope).await?;
        self.cached.store(Some(Arc::new(CachedToken {
            scope: scope.to_string(),
            token: token.clone(),
        })));
        Ok(token)
    }
}

/// Managed-identity endpoints take a resource, not a `/.default` scope.
fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

/// Token endpoint reply. Both endpoints send times as strings, some hosts
/// as numbers.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_on: Option<Value>,
    #[serde(default)]
    expires_in: Option<Value>,
}

impl TokenResponse {
    fn into_access_token(self, now: SystemTime) -> AccessToken {
        let expires_at = self
            .expires_on
            .as_ref()
            .and_then(as_seconds)
            .and_then(|secs| UNIX_EPOCH.checked_add(Duration::from_secs(secs)))
            .or_else(|| {
                self.expires_in
                    .as_ref()
                    .and_then(as_seconds)
                    .and_then(|secs| now.checked_add(Duration::from_secs(secs)))
            })
            .unwrap_or(now + DEFAULT_LIFETIME);

        AccessToken::new(self.access_token, expires_at)
    }
}

fn as_seconds(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_prefers_app_service() {
        let source = IdentitySource::from_lookup(|key| match key {
            "IDENTITY_ENDPOINT" => Some("http://localhost:4141/msi/token".to_string()),
            "IDENTITY_HEADER" => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(
            source,
            IdentitySource::AppService {
                endpoint: "http://localhost:4141/msi/token".to_string(),
                secret: "secret".to_string(),
            }
        );

        let source = IdentitySource::from_lookup(|key| match key {
            "IDENTITY_ENDPOINT" => Some("http://localhost:4141/msi/token".to_string()),
            _ => None,
        });
        assert_eq!(
            source,
            IdentitySource::Imds {
                endpoint: IMDS_ENDPOINT.to_string()
            }
        );
    }

    #[test]
    fn test_scope_to_resource() {
        assert_eq!(
            scope_to_resource("https://cognitiveservices.azure.com/.default"),
            "https://cognitiveservices.azure.com"
        );
        assert_eq!(scope_to_resource("api://x"), "api://x");
    }

    #[test]
    fn test_token_expiry_parsing() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000);

        let reply: TokenResponse =
            serde_json::from_value(json!({"access_token": "a", "expires_on": "5000"})).unwrap();
        assert_eq!(
            reply.into_access_token(now).expires_at,
            UNIX_EPOCH + Duration::from_secs(5_000)
        );

        let reply: TokenResponse =
            serde_json::from_value(json!({"access_token": "a", "expires_in": 60})).unwrap();
        assert_eq!(
            reply.into_access_token(now).expires_at,
            now + Duration::from_secs(60)
        );

        let reply: TokenResponse = serde_json::from_value(json!({"access_token": "a"})).unwrap();
        assert_eq!(reply.into_access_token(now).expires_at, now + DEFAULT_LIFETIME);
    }

    #[test]
    fn test_huge_expiry_falls_back_to_default_lifetime() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000);

        let reply: TokenResponse = serde_json::from_value(json!({
            "access_token": "a",
            "expires_on": u64::MAX,
            "expires_in": u64::MAX.to_string(),
        }))
        .unwrap();
        assert_eq!(reply.into_access_token(now).expires_at, now + DEFAULT_LIFETIME);
    }

    #[test]
    fn test_cached_token_respects_scope_and_expiry() {
        let credential = ManagedIdentityCredential::with_source(IdentitySource::Imds {
            endpoint: IMDS_ENDPOINT.to_string(),
        });
        assert_eq!(credential.cached_token("scope"), None);

        let fresh = AccessToken::new("t", SystemTime::now() + Duration::from_secs(3600));
        credential.cached.store(Some(Arc::new(CachedToken {
            scope: "scope".to_string(),
            token: fresh.clone(),
        })));
        assert_eq!(credential.cached_token("scope"), Some(fresh));
        assert_eq!(credential.cached_token("other"), None);

        credential.cached.store(Some(Arc::new(CachedToken {
            scope: "scope".to_string(),
            token: AccessToken::new("t", SystemTime::now() + Duration::from_secs(60)),
        })));
        assert_eq!(credential.cached_token("scope"), None);
    }

    #[tokio::test]
    async fn test_static_credential() {
        let token = StaticTokenCredential::new("abc")
            .get_token("scope")
            .await
            .unwrap();
        assert_eq!(token.token, "abc");
        assert!(token.is_fresh(EXPIRY_MARGIN));
    }
}
