//! # Configuration Management
//!
//! Environment-driven configuration for the Vault connection, lease renewal, the
//! session token, and observability.

pub mod settings;

pub use settings::{AppConfig, LeaseConfig, ObservabilityConfig, SessionConfig};
pub use crate::secrets::{AppRoleConfig, VaultConfig};
