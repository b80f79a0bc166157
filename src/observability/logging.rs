//! # Structured Logging
//!
//! Subscriber setup and span macros for lease and session operations.
//!
//! `RUST_LOG` takes precedence over the configured log level. With JSON logging
//! enabled every event is a single JSON object, span fields included.

use crate::config::{AppConfig, ObservabilityConfig};
use tracing_subscriber::EnvFilter;

/// Create a tracing span for a lease or session operation.
///
/// Every span carries a fresh `operation_id` so that the log lines of one renewal
/// chain step can be grouped.
///
/// ```rust,ignore
/// let span = lease_span!("renew", lineage = %requested);
/// ```
#[macro_export]
macro_rules! lease_span {
    ($operation:expr) => {
        tracing::info_span!(
            "lease_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::info_span!(
            "lease_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed (e.g. by a test harness).
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let result = if config.json_logging {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt().json().with_env_filter(filter).with_current_span(true).finish(),
        )
    } else {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt().with_env_filter(filter).with_target(true).finish(),
        )
    };

    result.is_ok()
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        vault_address = %config.vault.address,
        namespace = config.vault.namespace.as_deref().unwrap_or("-"),
        auth_method = if config.vault.approle.is_some() { "approle" } else { "token" },
        min_renewal_secs = config.lease.min_renewal_seconds,
        expiry_threshold_secs = config.lease.expiry_threshold_seconds,
        strategy = %config.lease.strategy,
        metrics_enabled = %config.observability.enable_metrics,
        "Vault lease manager configuration"
    );
}
