//! # Application Settings
//!
//! Settings are read from `VAULT_LEASE_*` environment variables (a `.env` file is
//! loaded first by the binary). The standard Vault variables `VAULT_ADDR`,
//! `VAULT_TOKEN`, and `VAULT_NAMESPACE` are honoured as fallbacks.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::errors::{Error, Result};
use crate::secrets::{AppRoleConfig, LeaseSettings, LeaseStrategy, SessionSettings, VaultConfig};

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    /// Vault connection and authentication
    #[validate(nested)]
    pub vault: VaultConfig,

    /// Lease renewal configuration
    #[validate(nested)]
    pub lease: LeaseConfig,

    /// Session token configuration
    #[validate(nested)]
    pub session: SessionConfig,

    /// Logging and metrics configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a variable.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            vault: vault_from_lookup(&lookup),
            lease: LeaseConfig::from_lookup(&lookup),
            session: SessionConfig::from_lookup(&lookup),
            observability: ObservabilityConfig::from_lookup(&lookup),
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()
    }

    /// Rules that span fields
    fn validate_custom(&self) -> Result<()> {
        if !self.vault.address.starts_with("http://") && !self.vault.address.starts_with("https://") {
            return Err(Error::validation_field(
                "Vault address must start with 'http://' or 'https://'",
                "vault.address",
            ));
        }

        let has_token = self.vault.token.as_ref().is_some_and(|token| !token.is_empty());
        if !has_token && self.vault.approle.is_none() {
            return Err(Error::validation(
                "No Vault authentication configured: set VAULT_LEASE_VAULT_TOKEN or AppRole credentials",
            ));
        }

        if self.session.refresh_before_expiry_seconds >= self.session.expiry_threshold_seconds {
            return Err(Error::validation_field(
                "Session refresh_before_expiry must be shorter than expiry_threshold",
                "session.refresh_before_expiry_seconds",
            ));
        }

        Ok(())
    }
}

fn first<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter().filter_map(|key| lookup(key)).find(|value| !value.is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key).and_then(|s| s.parse::<T>().ok()).unwrap_or(default)
}

fn flag_or<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|s| s.to_lowercase() == "true" || s == "1").unwrap_or(default)
}

fn vault_from_lookup<F>(lookup: &F) -> VaultConfig
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = VaultConfig::default();

    let approle = match (
        first(lookup, &["VAULT_LEASE_APPROLE_ROLE_ID"]),
        first(lookup, &["VAULT_LEASE_APPROLE_SECRET_ID"]),
    ) {
        (Some(role_id), Some(secret_id)) => Some(AppRoleConfig {
            role_id,
            secret_id,
            mount: first(lookup, &["VAULT_LEASE_APPROLE_MOUNT"]).unwrap_or_else(|| "approle".to_string()),
        }),
        _ => None,
    };

    VaultConfig {
        address: first(lookup, &["VAULT_LEASE_VAULT_ADDR", "VAULT_ADDR"]).unwrap_or(defaults.address),
        token: first(lookup, &["VAULT_LEASE_VAULT_TOKEN", "VAULT_TOKEN"]),
        namespace: first(lookup, &["VAULT_LEASE_VAULT_NAMESPACE", "VAULT_NAMESPACE"]),
        approle,
        request_timeout_seconds: parse_or(
            lookup,
            "VAULT_LEASE_VAULT_TIMEOUT_SECONDS",
            defaults.request_timeout_seconds,
        ),
    }
}

/// Lease renewal configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LeaseConfig {
    /// Lower bound for any renewal delay, in seconds
    #[validate(range(min = 1, max = 3600, message = "Minimum renewal must be between 1 and 3600 seconds"))]
    pub min_renewal_seconds: u64,

    /// How long before expiry leases are renewed, in seconds
    #[validate(range(max = 86400, message = "Expiry threshold must be at most 86400 seconds"))]
    pub expiry_threshold_seconds: u64,

    /// What to do with a lease whose renewal failed
    pub strategy: LeaseStrategy,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self { min_renewal_seconds: 10, expiry_threshold_seconds: 60, strategy: LeaseStrategy::DropOnError }
    }
}

impl LeaseConfig {
    fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            min_renewal_seconds: parse_or(lookup, "VAULT_LEASE_MIN_RENEWAL_SECONDS", defaults.min_renewal_seconds),
            expiry_threshold_seconds: parse_or(
                lookup,
                "VAULT_LEASE_EXPIRY_THRESHOLD_SECONDS",
                defaults.expiry_threshold_seconds,
            ),
            strategy: parse_or(lookup, "VAULT_LEASE_STRATEGY", defaults.strategy),
        }
    }

    pub fn settings(&self) -> LeaseSettings {
        LeaseSettings {
            min_renewal: Duration::from_secs(self.min_renewal_seconds),
            expiry_threshold: Duration::from_secs(self.expiry_threshold_seconds),
            strategy: self.strategy,
        }
    }
}

/// Session token configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SessionConfig {
    /// How long before expiry the token is refreshed, in seconds
    #[validate(range(max = 3600, message = "Refresh lead time must be at most 3600 seconds"))]
    pub refresh_before_expiry_seconds: u64,

    /// Tokens with less validity left are not handed out, in seconds
    #[validate(range(min = 1, max = 3600, message = "Token expiry threshold must be between 1 and 3600 seconds"))]
    pub expiry_threshold_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { refresh_before_expiry_seconds: 5, expiry_threshold_seconds: 7 }
    }
}

impl SessionConfig {
    fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            refresh_before_expiry_seconds: parse_or(
                lookup,
                "VAULT_LEASE_SESSION_REFRESH_BEFORE_EXPIRY_SECONDS",
                defaults.refresh_before_expiry_seconds,
            ),
            expiry_threshold_seconds: parse_or(
                lookup,
                "VAULT_LEASE_SESSION_EXPIRY_THRESHOLD_SECONDS",
                defaults.expiry_threshold_seconds,
            ),
        }
    }

    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            refresh_before_expiry: Duration::from_secs(self.refresh_before_expiry_seconds),
            expiry_threshold: Duration::from_secs(self.expiry_threshold_seconds),
        }
    }
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,

    /// Service name attached to metrics
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            metrics_port: 9090,
            service_name: "vault-lease".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

impl ObservabilityConfig {
    fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            enable_metrics: flag_or(lookup, "VAULT_LEASE_ENABLE_METRICS", defaults.enable_metrics),
            metrics_port: parse_or(lookup, "VAULT_LEASE_METRICS_PORT", defaults.metrics_port),
            service_name: first(lookup, &["VAULT_LEASE_SERVICE_NAME"]).unwrap_or(defaults.service_name),
            log_level: first(lookup, &["VAULT_LEASE_LOG_LEVEL"]).unwrap_or(defaults.log_level),
            json_logging: flag_or(lookup, "VAULT_LEASE_JSON_LOGGING", defaults.json_logging),
        }
    }

    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(config.vault.address, "http://127.0.0.1:8200");
        assert_eq!(config.lease.min_renewal_seconds, 10);
        assert_eq!(config.lease.expiry_threshold_seconds, 60);
        assert_eq!(config.lease.strategy, LeaseStrategy::DropOnError);
        assert_eq!(config.session.refresh_before_expiry_seconds, 5);
        assert_eq!(config.session.expiry_threshold_seconds, 7);
        assert!(!config.observability.enable_metrics);
    }

    #[test]
    fn test_prefixed_variables_win_over_vault_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("VAULT_ADDR", "http://fallback:8200"),
            ("VAULT_LEASE_VAULT_ADDR", "https://vault.internal:8200"),
            ("VAULT_TOKEN", "s.fallback"),
            ("VAULT_NAMESPACE", "team-a"),
        ]));
        assert_eq!(config.vault.address, "https://vault.internal:8200");
        assert_eq!(config.vault.token.as_deref(), Some("s.fallback"));
        assert_eq!(config.vault.namespace.as_deref(), Some("team-a"));
    }

    #[test]
    fn test_lease_and_session_variables() {
        let config = AppConfig::from_lookup(lookup(&[
            ("VAULT_LEASE_MIN_RENEWAL_SECONDS", "5"),
            ("VAULT_LEASE_EXPIRY_THRESHOLD_SECONDS", "20"),
            ("VAULT_LEASE_STRATEGY", "retain-on-io"),
            ("VAULT_LEASE_SESSION_REFRESH_BEFORE_EXPIRY_SECONDS", "30"),
            ("VAULT_LEASE_SESSION_EXPIRY_THRESHOLD_SECONDS", "60"),
            ("VAULT_LEASE_ENABLE_METRICS", "true"),
            ("VAULT_LEASE_METRICS_PORT", "9464"),
            ("VAULT_LEASE_JSON_LOGGING", "1"),
        ]));

        let lease = config.lease.settings();
        assert_eq!(lease.min_renewal, Duration::from_secs(5));
        assert_eq!(lease.expiry_threshold, Duration::from_secs(20));
        assert_eq!(lease.strategy, LeaseStrategy::RetainOnIoError);

        let session = config.session.settings();
        assert_eq!(session.refresh_before_expiry, Duration::from_secs(30));
        assert_eq!(session.expiry_threshold, Duration::from_secs(60));

        assert!(config.observability.enable_metrics);
        assert_eq!(config.observability.metrics_bind_address().as_deref(), Some("0.0.0.0:9464"));
        assert!(config.observability.json_logging);
    }

    #[test]
    fn test_unparseable_values_fall_back_to_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("VAULT_LEASE_MIN_RENEWAL_SECONDS", "soon"),
            ("VAULT_LEASE_STRATEGY", "sometimes"),
        ]));
        assert_eq!(config.lease.min_renewal_seconds, 10);
        assert_eq!(config.lease.strategy, LeaseStrategy::DropOnError);
    }

    #[test]
    fn test_approle_requires_both_ids() {
        let config = AppConfig::from_lookup(lookup(&[("VAULT_LEASE_APPROLE_ROLE_ID", "role")]));
        assert!(config.vault.approle.is_none());

        let config = AppConfig::from_lookup(lookup(&[
            ("VAULT_LEASE_APPROLE_ROLE_ID", "role"),
            ("VAULT_LEASE_APPROLE_SECRET_ID", "secret"),
        ]));
        let approle = config.vault.approle.unwrap();
        assert_eq!(approle.mount, "approle");
    }

    #[test]
    fn test_validation() {
        let config = AppConfig::from_lookup(lookup(&[("VAULT_TOKEN", "s.token")]));
        assert!(config.validate().is_ok());

        // No authentication
        let config = AppConfig::from_lookup(lookup(&[]));
        assert!(config.validate().is_err());

        // Bad scheme
        let config = AppConfig::from_lookup(lookup(&[("VAULT_TOKEN", "s.token"), ("VAULT_ADDR", "vault:8200")]));
        assert!(matches!(config.validate(), Err(Error::Validation { .. })));

        // Refresh lead time must be shorter than the threshold
        let config = AppConfig::from_lookup(lookup(&[
            ("VAULT_TOKEN", "s.token"),
            ("VAULT_LEASE_SESSION_REFRESH_BEFORE_EXPIRY_SECONDS", "10"),
        ]));
        assert!(config.validate().is_err());

        // Field validation
        let config = AppConfig::from_lookup(lookup(&[
            ("VAULT_TOKEN", "s.token"),
            ("VAULT_LEASE_MIN_RENEWAL_SECONDS", "0"),
        ]));
        assert!(config.validate().is_err());
    }
}
