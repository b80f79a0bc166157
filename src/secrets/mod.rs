//! Leased secret retrieval and renewal for HashiCorp Vault.
//!
//! This module keeps time-bound credentials alive: it fetches secrets, renews their
//! leases before they expire, rotates secrets that can no longer be renewed, keeps
//! the client's own session token valid, and revokes everything on shutdown.
//!
//! # Architecture
//!
//! - [`LeaseRenewalScheduler`]: one-shot renewal timers for one lease lineage,
//!   with generation-based staleness checks so that only the latest schedule may
//!   renew.
//! - [`SecretLeaseContainer`]: the registry of requested secrets, one scheduler
//!   each, plus lease events and error events.
//! - [`LeaseAwareSecretSource`]: a read-only property map bound to one requested
//!   secret and refreshed by the container's events.
//! - [`SessionManager`]: login, token refresh, and revocation for the Vault token
//!   the transport uses.
//!
//! The core reaches Vault only through the traits in [`operations`].
//! [`VaultLeaseOperations`], [`VaultTokenOperations`], and the login methods in
//! [`auth`] are the Vault implementations.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vault_lease::secrets::{
//!     LeaseAwareSecretSource, LeaseSettings, RequestedSecret, SecretLeaseContainer,
//!     SessionManager, SessionSettings, SourceOptions, VaultConfig, VaultLeaseOperations,
//!     VaultTokenOperations,
//! };
//!
//! let session = SessionManager::new(auth, Arc::new(VaultTokenOperations::new(config.clone())), SessionSettings::default());
//! let operations = VaultLeaseOperations::new(config, Arc::new(session.clone()))?;
//! let container = SecretLeaseContainer::new(Arc::new(operations), LeaseSettings::default());
//!
//! let source = LeaseAwareSecretSource::bind(
//!     &container,
//!     RequestedSecret::rotating("database/creds/readonly"),
//!     SourceOptions::fail_fast(),
//! )
//! .await?;
//! let username = source.get("username");
//!
//! // On shutdown
//! container.destroy().await;
//! session.destroy().await;
//! ```
//!
//! # Security Considerations
//!
//! - Secret values and tokens are never logged
//! - Tokens and secret ids are wrapped in redacting types that zero memory on drop
//! - Revocation failures at shutdown are logged, never propagated

pub mod auth;
pub mod container;
pub mod error;
pub mod events;
pub mod flatten;
pub mod lease;
pub mod operations;
pub mod requested;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod strategy;
pub mod types;
pub mod vault;

// Re-export main types
pub use auth::{authentication_from_config, AppRoleAuthentication, StaticTokenAuthentication};
pub use container::{LeaseSettings, SecretLeaseContainer};
pub use error::{Result, SecretsError};
pub use events::{ListenerId, ListenerRegistry, SecretLeaseError, SecretLeaseEvent};
pub use lease::Lease;
pub use operations::{ClientAuthentication, LeaseOperations, SessionTokenSource, TokenOperations};
pub use requested::{RenewalMode, RequestedSecret};
pub use scheduler::{renew_fn, renewal_delay, LeaseRenewalScheduler, RenewLease};
pub use session::{AuthenticationEvent, Clock, SessionManager, SessionSettings, SystemClock};
pub use source::{LeaseAwareSecretSource, SourceOptions, SourceState};
pub use strategy::LeaseStrategy;
pub use types::{LoginToken, SecretResponse, SecretString, TokenLookup, VaultToken, WrapInfo};
pub use vault::{AppRoleConfig, VaultConfig, VaultLeaseOperations, VaultTokenOperations};
