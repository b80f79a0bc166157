//! HashiCorp Vault implementations of the lease and token operations.
//!
//! Lease traffic (logical reads, `sys/leases/renew`, `sys/leases/revoke`) goes
//! through a plain `reqwest` client so that any secret engine path can be read and
//! its lease metadata kept. Token self-operations go through `vaultrs`.
//!
//! # Configuration
//!
//! - Vault server address (HTTPS recommended)
//! - A static token or AppRole credentials
//! - Optional namespace for multi-tenancy
//!
//! # Security
//!
//! - Tokens travel only in the `X-Vault-Token` header and are never logged
//! - Secret data is never logged; only key counts and lease ids are

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};

use super::error::{Result, SecretsError};
use super::lease::Lease;
use super::operations::{LeaseOperations, SessionTokenSource, TokenOperations};
use super::types::{LoginToken, SecretResponse, TokenLookup, VaultToken};

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";

/// AppRole credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppRoleConfig {
    #[validate(length(min = 1, message = "AppRole role_id cannot be empty"))]
    pub role_id: String,

    #[serde(skip_serializing)]
    #[validate(length(min = 1, message = "AppRole secret_id cannot be empty"))]
    pub secret_id: String,

    /// Auth mount path (default: "approle")
    #[serde(default = "default_approle_mount")]
    pub mount: String,
}

fn default_approle_mount() -> String {
    "approle".to_string()
}

/// Configuration for connecting to Vault.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VaultConfig {
    /// Vault server address (e.g., "https://vault.example.com:8200")
    #[validate(length(min = 1, message = "Vault address cannot be empty"))]
    pub address: String,

    /// Static token (if using token auth)
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Vault namespace (for Enterprise multi-tenancy)
    pub namespace: Option<String>,

    /// AppRole credentials; take precedence over `token`
    #[validate(nested)]
    pub approle: Option<AppRoleConfig>,

    /// Per-request timeout in seconds
    #[validate(range(min = 1, max = 300, message = "Vault request timeout must be between 1 and 300 seconds"))]
    pub request_timeout_seconds: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8200".to_string(),
            token: None,
            namespace: None,
            approle: None,
            request_timeout_seconds: 30,
        }
    }
}

impl VaultConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    fn base_url(&self) -> &str {
        self.address.trim_end_matches('/')
    }
}

/// Build a `vaultrs` client, optionally authenticated with `token`.
pub(crate) fn vault_client(config: &VaultConfig, token: Option<&VaultToken>) -> Result<VaultClient> {
    let mut settings_builder = VaultClientSettingsBuilder::default();
    settings_builder.address(config.base_url());

    if let Some(token) = token {
        settings_builder.token(token.expose());
    }

    if let Some(namespace) = &config.namespace {
        settings_builder.namespace(Some(namespace.clone()));
    }

    let settings = settings_builder
        .build()
        .map_err(|e| SecretsError::config_error(format!("Invalid Vault configuration: {}", e)))?;

    VaultClient::new(settings)
        .map_err(|e| SecretsError::connection_failed(format!("Failed to create Vault client: {}", e)))
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RenewRequest<'a> {
    lease_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    increment: Option<u64>,
}

#[derive(Debug, Serialize)]
struct RevokeRequest<'a> {
    lease_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RenewResponse {
    #[serde(default)]
    lease_id: String,
    #[serde(default)]
    lease_duration: u64,
    #[serde(default)]
    renewable: bool,
}

/// [`LeaseOperations`] over Vault's HTTP API.
pub struct VaultLeaseOperations {
    http: reqwest::Client,
    config: VaultConfig,
    tokens: Arc<dyn SessionTokenSource>,
}

impl std::fmt::Debug for VaultLeaseOperations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultLeaseOperations")
            .field("address", &self.config.address)
            .field("namespace", &self.config.namespace)
            .finish()
    }
}

impl VaultLeaseOperations {
    /// Create the transport. Every request asks `tokens` for a valid token.
    pub fn new(config: VaultConfig, tokens: Arc<dyn SessionTokenSource>) -> Result<Self> {
        if config.address.is_empty() {
            return Err(SecretsError::config_error("Vault address cannot be empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SecretsError::config_error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config, tokens })
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self.tokens.session_token().await?;
        let url = format!("{}/v1/{}", self.config.base_url(), path.trim_start_matches('/'));

        let mut request = self.http.request(method, url).header(TOKEN_HEADER, token.expose());
        if let Some(namespace) = &self.config.namespace {
            request = request.header(NAMESPACE_HEADER, namespace);
        }
        Ok(request)
    }

    /// Map a non-success status onto an error, using Vault's `errors` array.
    async fn check(response: reqwest::Response, path: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let errors = serde_json::from_str::<ErrorResponse>(&body).unwrap_or_default().errors;
        let message = if errors.is_empty() { status.to_string() } else { errors.join("; ") };

        match status {
            StatusCode::NOT_FOUND => Err(SecretsError::not_found(path)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SecretsError::authentication_failed(message)),
            _ => Err(SecretsError::backend_error(status.as_u16(), message)),
        }
    }
}

#[async_trait]
impl LeaseOperations for VaultLeaseOperations {
    async fn fetch(&self, path: &str) -> Result<SecretResponse> {
        let response = self.request(Method::GET, path).await?.send().await?;
        let response = Self::check(response, path).await?;
        let secret: SecretResponse = response.json().await?;

        tracing::debug!(
            path = %path,
            request_id = %secret.request_id,
            lease_id = %secret.lease_id,
            warnings = secret.warnings.as_ref().map(Vec::len).unwrap_or(0),
            "Read secret from Vault"
        );
        Ok(secret)
    }

    async fn renew(&self, lease: &Lease, increment: Option<Duration>) -> Result<Lease> {
        let body = RenewRequest { lease_id: lease.lease_id(), increment: increment.map(|d| d.as_secs()) };
        let response = self.request(Method::PUT, "sys/leases/renew").await?.json(&body).send().await?;
        let response = Self::check(response, "sys/leases/renew").await?;
        let renewed: RenewResponse = response.json().await?;

        if renewed.lease_id.is_empty() {
            return Ok(Lease::none());
        }
        Lease::of(renewed.lease_id, Duration::from_secs(renewed.lease_duration), renewed.renewable)
    }

    async fn revoke(&self, lease: &Lease) -> Result<()> {
        let body = RevokeRequest { lease_id: lease.lease_id() };
        let response = self.request(Method::PUT, "sys/leases/revoke").await?.json(&body).send().await?;
        Self::check(response, "sys/leases/revoke").await?;
        Ok(())
    }
}

/// [`TokenOperations`] backed by `vaultrs`.
#[derive(Debug, Clone)]
pub struct VaultTokenOperations {
    config: VaultConfig,
}

impl VaultTokenOperations {
    pub fn new(config: VaultConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TokenOperations for VaultTokenOperations {
    async fn renew_self(&self, token: &VaultToken) -> Result<LoginToken> {
        let client = vault_client(&self.config, Some(token))?;
        let auth = vaultrs::token::renew_self(&client, None).await?;
        Ok(LoginToken::new(
            VaultToken::new(auth.client_token),
            Duration::from_secs(auth.lease_duration),
            auth.renewable,
        ))
    }

    async fn lookup_self(&self, token: &VaultToken) -> Result<TokenLookup> {
        let client = vault_client(&self.config, Some(token))?;
        let lookup = vaultrs::token::lookup_self(&client).await?;
        Ok(TokenLookup { ttl: Duration::from_secs(lookup.ttl), renewable: lookup.renewable })
    }

    async fn revoke_self(&self, token: &VaultToken) -> Result<()> {
        let client = vault_client(&self.config, Some(token))?;
        vaultrs::token::revoke_self(&client).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_config_default() {
        let config = VaultConfig::default();
        assert_eq!(config.address, "http://127.0.0.1:8200");
        assert!(config.token.is_none());
        assert!(config.approle.is_none());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_vault_config_validation() {
        let config = VaultConfig { address: String::new(), ..Default::default() };
        assert!(config.validate().is_err());

        let config = VaultConfig {
            approle: Some(AppRoleConfig {
                role_id: "role".into(),
                secret_id: String::new(),
                mount: default_approle_mount(),
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_token_is_not_serialized() {
        let config = VaultConfig { token: Some("s.root".into()), ..Default::default() };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("s.root"));
    }

    #[test]
    fn test_empty_address_is_rejected() {
        let config = VaultConfig { address: String::new(), ..Default::default() };
        let tokens: Arc<dyn SessionTokenSource> = Arc::new(VaultToken::new("s.test"));
        let err = VaultLeaseOperations::new(config, tokens).unwrap_err();
        assert!(matches!(err, SecretsError::ConfigError { .. }));
    }

    #[test]
    fn test_renew_request_shape() {
        let body = RenewRequest { lease_id: "database/creds/app/abc", increment: Some(3600) };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"lease_id": "database/creds/app/abc", "increment": 3600})
        );

        let body = RenewRequest { lease_id: "x", increment: None };
        assert_eq!(serde_json::to_value(&body).unwrap(), serde_json::json!({"lease_id": "x"}));
    }
}
