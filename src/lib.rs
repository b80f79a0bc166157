//! # vault-lease
//!
//! Lease renewal and session lifecycle management for HashiCorp Vault secrets.
//!
//! Dynamic secrets (database credentials, cloud keys, PKI material) come with a
//! lease. This crate renews those leases ahead of expiry, fetches rotating
//! secrets again when their lease can no longer be extended, keeps the client's
//! own Vault token fresh, and revokes everything on shutdown.
//!
//! ## Core Components
//!
//! - **Renewal scheduler**: one renewal timer per lease lineage, superseded
//!   schedules never clobber newer leases
//! - **Lease container**: registry of requested secrets with lease and error events
//! - **Secret source**: read-only property view that follows rotation
//! - **Session manager**: login, token refresh, and token revocation
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vault_lease::secrets::{
//!     authentication_from_config, LeaseAwareSecretSource, RequestedSecret, SecretLeaseContainer,
//!     SessionManager, SourceOptions, VaultLeaseOperations, VaultTokenOperations,
//! };
//! use vault_lease::AppConfig;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = AppConfig::from_env();
//! let auth = authentication_from_config(&config.vault).expect("Vault credentials");
//! let tokens = Arc::new(VaultTokenOperations::new(config.vault.clone()));
//! let session = SessionManager::new(auth, tokens, config.session.settings());
//!
//! let operations = VaultLeaseOperations::new(config.vault.clone(), Arc::new(session.clone()))?;
//! let container = SecretLeaseContainer::new(Arc::new(operations), config.lease.settings());
//! let source = LeaseAwareSecretSource::bind(
//!     &container,
//!     RequestedSecret::rotating("database/creds/readonly"),
//!     SourceOptions::fail_fast(),
//! )
//! .await?;
//! println!("username = {:?}", source.get("username"));
//!
//! container.destroy().await;
//! session.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod errors;
pub mod observability;
pub mod secrets;

// Re-export commonly used types and traits
pub use config::AppConfig;
pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
