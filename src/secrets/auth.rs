//! Login methods for the session manager.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::error::Result;
use super::operations::ClientAuthentication;
use super::types::{LoginToken, SecretString, VaultToken};
use super::vault::{vault_client, AppRoleConfig, VaultConfig};

/// Uses a token supplied from outside.
///
/// The token's TTL is unknown at login, so the session manager looks it up.
/// The token is not revoked when the session ends.
#[derive(Debug, Clone)]
pub struct StaticTokenAuthentication {
    token: VaultToken,
}

impl StaticTokenAuthentication {
    pub fn new(token: VaultToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl ClientAuthentication for StaticTokenAuthentication {
    async fn login(&self) -> Result<LoginToken> {
        Ok(LoginToken::of(self.token.clone()))
    }

    fn method(&self) -> &'static str {
        "token"
    }

    fn owns_token(&self) -> bool {
        false
    }
}

/// Logs in with an AppRole `role_id` and `secret_id`.
pub struct AppRoleAuthentication {
    config: VaultConfig,
    mount: String,
    role_id: String,
    secret_id: SecretString,
}

impl std::fmt::Debug for AppRoleAuthentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRoleAuthentication")
            .field("mount", &self.mount)
            .field("role_id", &self.role_id)
            .finish()
    }
}

impl AppRoleAuthentication {
    pub fn new(config: VaultConfig, approle: &AppRoleConfig) -> Self {
        Self {
            config,
            mount: approle.mount.clone(),
            role_id: approle.role_id.clone(),
            secret_id: SecretString::new(approle.secret_id.clone()),
        }
    }
}

#[async_trait]
impl ClientAuthentication for AppRoleAuthentication {
    async fn login(&self) -> Result<LoginToken> {
        let client = vault_client(&self.config, None)?;
        let auth =
            vaultrs::auth::approle::login(&client, &self.mount, &self.role_id, self.secret_id.expose_secret())
                .await?;

        tracing::debug!(
            mount = %self.mount,
            lease_duration_secs = auth.lease_duration,
            renewable = auth.renewable,
            "AppRole login succeeded"
        );
        Ok(LoginToken::new(VaultToken::new(auth.client_token), Duration::from_secs(auth.lease_duration), auth.renewable))
    }

    fn method(&self) -> &'static str {
        "approle"
    }
}

/// Pick the login method `config` asks for: AppRole when configured, else the static token.
pub fn authentication_from_config(config: &VaultConfig) -> Option<Arc<dyn ClientAuthentication>> {
    if let Some(approle) = &config.approle {
        return Some(Arc::new(AppRoleAuthentication::new(config.clone(), approle)));
    }
    config
        .token
        .as_ref()
        .filter(|token| !token.is_empty())
        .map(|token| {
            Arc::new(StaticTokenAuthentication::new(VaultToken::new(token.clone()))) as Arc<dyn ClientAuthentication>
        })
}
