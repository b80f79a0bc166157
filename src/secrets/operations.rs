//! Collaborator traits consumed by the lease container and the session manager.
//!
//! The core never talks to Vault directly. It fetches, renews, and revokes leases
//! through [`LeaseOperations`], logs in through [`ClientAuthentication`], and keeps
//! its own token alive through [`TokenOperations`]. [`crate::secrets::vault`] and
//! [`crate::secrets::auth`] provide the HTTP-backed implementations; tests provide
//! in-memory ones.
//!
//! # Security Considerations
//!
//! - Implementations MUST NOT log secret data or tokens
//! - Errors SHOULD be mapped onto [`SecretsError`] so that lease strategies can
//!   tell transport failures from refusals

use async_trait::async_trait;
use std::time::Duration;

use super::error::Result;
use super::lease::Lease;
use super::types::{LoginToken, SecretResponse, TokenLookup, VaultToken};

#[cfg(doc)]
use super::error::SecretsError;

/// Lease-level operations against the secret store.
#[async_trait]
pub trait LeaseOperations: Send + Sync {
    /// Read a secret, returning the full response envelope.
    async fn fetch(&self, path: &str) -> Result<SecretResponse>;

    /// Renew `lease`, optionally asking for a specific increment.
    ///
    /// A returned lease without an id means the lease will not be renewed further.
    async fn renew(&self, lease: &Lease, increment: Option<Duration>) -> Result<Lease>;

    /// Revoke `lease`. Callers treat failures as best-effort.
    async fn revoke(&self, lease: &Lease) -> Result<()>;
}

/// An authentication method able to produce a fresh token.
#[async_trait]
pub trait ClientAuthentication: Send + Sync {
    async fn login(&self) -> Result<LoginToken>;

    /// Name used in logs and metrics labels.
    fn method(&self) -> &'static str {
        "token"
    }

    /// Whether tokens from this method belong to the session and are revoked with it.
    fn owns_token(&self) -> bool {
        true
    }
}

/// Operations a token can perform on itself.
#[async_trait]
pub trait TokenOperations: Send + Sync {
    async fn renew_self(&self, token: &VaultToken) -> Result<LoginToken>;

    async fn lookup_self(&self, token: &VaultToken) -> Result<TokenLookup>;

    async fn revoke_self(&self, token: &VaultToken) -> Result<()>;
}

/// Anything that can hand out a currently valid token.
#[async_trait]
pub trait SessionTokenSource: Send + Sync {
    async fn session_token(&self) -> Result<VaultToken>;
}

/// A fixed token, used when no session management is wanted.
#[async_trait]
impl SessionTokenSource for VaultToken {
    async fn session_token(&self) -> Result<VaultToken> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal;

    #[async_trait]
    impl ClientAuthentication for Minimal {
        async fn login(&self) -> Result<LoginToken> {
            Ok(LoginToken::of(VaultToken::new("s.minimal")))
        }
    }

    #[test]
    fn test_fixed_token_source() {
        let token = VaultToken::new("s.fixed");
        let issued = tokio_test::block_on(token.session_token()).unwrap();
        assert_eq!(issued.expose(), "s.fixed");
    }

    #[test]
    fn test_authentication_defaults() {
        let auth = Minimal;
        assert_eq!(auth.method(), "token");
        assert!(auth.owns_token());
        let login = tokio_test::block_on(auth.login()).unwrap();
        assert_eq!(login.token().expose(), "s.minimal");
    }
}
