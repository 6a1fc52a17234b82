//! Per-provider credentials and request header derivation
//!
//! Holds credentials keyed by provider, derives auth headers per scheme and
//! refreshes OAuth2 bearer tokens through the provider token endpoint before
//! they expire. Replacing credentials always invalidates the derived token
//! cache for that provider.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{AuthMethod, ProviderConfig};
use crate::error::{CloudError, Result};
use crate::provider::CloudProvider;
use crate::transport::{HttpMethod, HttpTransport, TransportRequest};

/// Raw credential material for one provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub account_email: Option<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Credentials {
    pub fn access_keys(key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            access_key_id: Some(key_id.into()),
            secret_access_key: Some(secret.into()),
            ..Self::default()
        }
    }

    pub fn api_key(key: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            account_email: Some(email.into()),
            ..Self::default()
        }
    }

    pub fn oauth2(bearer: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            bearer_token: Some(bearer.into()),
            expires_at,
            ..Self::default()
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }
}

/// Derived OAuth2 token state
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

/// Credential store and auth header factory
pub struct CredentialManager {
    transport: Arc<dyn HttpTransport>,
    credentials: RwLock<HashMap<CloudProvider, Credentials>>,
    tokens: RwLock<HashMap<CloudProvider, CachedToken>>,
    refresh_threshold: chrono::Duration,
    http_timeout: Duration,
}

impl CredentialManager {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            credentials: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            refresh_threshold: chrono::Duration::minutes(5),
            http_timeout: Duration::from_secs(10),
        }
    }

    /// Replace credentials for a provider, invalidating any derived token
    pub fn set_credentials(&self, provider: CloudProvider, credentials: Credentials) {
        self.credentials.write().insert(provider, credentials);
        self.tokens.write().remove(&provider);
        info!(provider = %provider, "Credentials updated");
    }

    pub fn credentials(&self, provider: CloudProvider) -> Option<Credentials> {
        self.credentials.read().get(&provider).cloned()
    }

    pub fn cached_token(&self, provider: CloudProvider) -> Option<CachedToken> {
        self.tokens.read().get(&provider).cloned()
    }

    /// Shape-only credential validation per provider
    pub fn validate(&self, provider: CloudProvider, credentials: &Credentials) -> Result<()> {
        let missing = |what: &str| CloudError::InvalidCredentials {
            provider,
            reason: format!("missing {what}"),
        };
        match provider {
            CloudProvider::S3 => {
                if credentials.access_key_id.is_none() {
                    return Err(missing("access key id"));
                }
                if credentials.secret_access_key.is_none() {
                    return Err(missing("secret access key"));
                }
            }
            CloudProvider::R2 => {
                if credentials.api_key.is_none() {
                    return Err(missing("API key"));
                }
                if credentials.account_email.is_none() {
                    return Err(missing("account email"));
                }
            }
            CloudProvider::Gcs | CloudProvider::AzureBlob => {
                if credentials.bearer_token.is_none() && credentials.refresh_token.is_none() {
                    return Err(missing("bearer or refresh token"));
                }
            }
        }
        Ok(())
    }

    /// Derive request headers for a provider under its configured scheme.
    ///
    /// Synchronous for key-based schemes; OAuth2 providers may refresh the
    /// bearer token over the network first.
    pub async fn auth_headers(
        &self,
        provider: CloudProvider,
        config: &ProviderConfig,
    ) -> Result<Vec<(String, String)>> {
        match (provider, config.auth_method) {
            (CloudProvider::S3, AuthMethod::IamRole) | (CloudProvider::S3, AuthMethod::ApiKey) => {
                Ok(self.s3_headers(config))
            }
            (CloudProvider::R2, AuthMethod::ApiKey) => Ok(self.r2_headers()),
            (CloudProvider::Gcs, AuthMethod::Oauth2)
            | (CloudProvider::AzureBlob, AuthMethod::Oauth2) => {
                self.refresh_if_needed(provider).await?;
                self.bearer_headers(provider)
            }
            (provider, method) => Err(CloudError::UnsupportedAuthMethod { provider, method }),
        }
    }

    /// AWS-signature-shaped `Authorization` header when key and secret are
    /// both present; no headers otherwise (ambient role).
    fn s3_headers(&self, config: &ProviderConfig) -> Vec<(String, String)> {
        let creds = self.credentials.read();
        let Some(credentials) = creds.get(&CloudProvider::S3) else {
            return Vec::new();
        };
        let (Some(key_id), Some(secret)) = (
            credentials.access_key_id.as_deref(),
            credentials.secret_access_key.as_deref(),
        ) else {
            return Vec::new();
        };

        let date = Utc::now().format("%Y%m%d").to_string();
        let region = config.region.as_deref().unwrap_or("us-east-1");

        let mut hasher = DefaultHasher::new();
        (key_id, secret, date.as_str(), region).hash(&mut hasher);
        let signature = format!("{:016x}", hasher.finish());

        let mut headers = vec![
            (
                "Authorization".to_string(),
                format!(
                    "AWS4-HMAC-SHA256 Credential={key_id}/{date}/{region}/s3/aws4_request, \
                     SignedHeaders=host;x-amz-date, Signature={signature}"
                ),
            ),
            (
                "x-amz-date".to_string(),
                Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
            ),
        ];
        if let Some(session) = &credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), session.clone()));
        }
        headers
    }

    fn r2_headers(&self) -> Vec<(String, String)> {
        let creds = self.credentials.read();
        let Some(credentials) = creds.get(&CloudProvider::R2) else {
            return Vec::new();
        };
        let mut headers = Vec::new();
        if let Some(key) = &credentials.api_key {
            headers.push(("X-Auth-Key".to_string(), key.clone()));
        }
        if let Some(email) = &credentials.account_email {
            headers.push(("X-Auth-Email".to_string(), email.clone()));
        }
        headers
    }

    fn bearer_headers(&self, provider: CloudProvider) -> Result<Vec<(String, String)>> {
        let token = self
            .ensure_token(provider)?
            .ok_or(CloudError::NoOauth2Token(provider))?;
        Ok(vec![(
            "Authorization".to_string(),
            format!("Bearer {}", token.access_token),
        )])
    }

    /// Materialize the token cache entry from stored credentials if absent
    fn ensure_token(&self, provider: CloudProvider) -> Result<Option<CachedToken>> {
        if let Some(token) = self.tokens.read().get(&provider) {
            return Ok(Some(token.clone()));
        }
        let creds = self.credentials.read();
        let Some(credentials) = creds.get(&provider) else {
            return Ok(None);
        };
        let Some(bearer) = &credentials.bearer_token else {
            return Ok(None);
        };
        let token = CachedToken {
            access_token: bearer.clone(),
            expires_at: credentials
                .expires_at
                .unwrap_or_else(|| Utc::now() + chrono::Duration::hours(1)),
            refresh_token: credentials.refresh_token.clone(),
            scopes: credentials.scopes.clone(),
        };
        drop(creds);
        self.tokens.write().insert(provider, token.clone());
        Ok(Some(token))
    }

    /// Refresh the provider token when it is within the refresh threshold of
    /// expiry and a refresh token is available.
    pub async fn refresh_if_needed(&self, provider: CloudProvider) -> Result<()> {
        let Some(token) = self.ensure_token(provider)? else {
            return Ok(());
        };
        if token.expires_at - Utc::now() > self.refresh_threshold {
            return Ok(());
        }
        let Some(refresh_token) = token.refresh_token.clone() else {
            debug!(provider = %provider, "Token near expiry but no refresh token");
            return Ok(());
        };

        let Some(endpoint) = provider.oauth_token_endpoint() else {
            return Ok(());
        };

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("refresh_token", &refresh_token)
            .finish();

        let request = TransportRequest::new(HttpMethod::Post, endpoint, self.http_timeout)
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body(Bytes::from(body));

        let outcome = match self.transport.execute(request).await {
            Ok(response) if response.is_success() => {
                serde_json::from_slice::<TokenEndpointResponse>(&response.body)
                    .map_err(|e| e.to_string())
            }
            Ok(response) => Err(format!("token endpoint returned HTTP {}", response.status)),
            Err(err) => Err(err.to_string()),
        };

        match outcome {
            Ok(refreshed) => {
                let scopes = refreshed
                    .scope
                    .map(|s| s.split_whitespace().map(str::to_string).collect())
                    .unwrap_or(token.scopes);
                self.tokens.write().insert(
                    provider,
                    CachedToken {
                        access_token: refreshed.access_token,
                        expires_at: Utc::now() + chrono::Duration::seconds(refreshed.expires_in),
                        refresh_token: refreshed.refresh_token.or(Some(refresh_token)),
                        scopes,
                    },
                );
                info!(provider = %provider, "OAuth2 token refreshed");
                Ok(())
            }
            Err(reason) => {
                // The stale bearer and dead refresh token are unusable;
                // later header derivations must report NO_OAUTH2_TOKEN.
                self.tokens.write().remove(&provider);
                if let Some(credentials) = self.credentials.write().get_mut(&provider) {
                    credentials.bearer_token = None;
                    credentials.refresh_token = None;
                }
                warn!(provider = %provider, reason = %reason, "Token refresh failed");
                Err(CloudError::TokenRefreshFailed { provider, reason })
            }
        }
    }
}
