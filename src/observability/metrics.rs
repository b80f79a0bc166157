//! # Metrics Collection
//!
//! Prometheus metrics for lease renewal, revocation, rotation, and session refresh.
//!
//! Recording goes through the `metrics` facade, so every call is a no-op until
//! [`init_metrics`] installs the Prometheus exporter.

use crate::config::ObservabilityConfig;
use crate::errors::{Error, Result};
use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

/// Records lease and session metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeaseMetrics;

impl LeaseMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Record a renew call for a lease of the given renewal mode.
    pub fn record_renewal(&self, mode: &'static str, success: bool) {
        if success {
            counter!("vault_lease_renewals_total", "mode" => mode).increment(1);
        } else {
            counter!("vault_lease_renewal_failures_total", "mode" => mode).increment(1);
        }
    }

    /// Record a revoke call made during shutdown or on demand.
    pub fn record_revocation(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!("vault_lease_revocations_total", "status" => status).increment(1);
    }

    /// Record a rotating secret being fetched again.
    pub fn record_rotation(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!("vault_lease_rotations_total", "status" => status).increment(1);
    }

    /// Record a login by the given authentication method.
    pub fn record_login(&self, method: &'static str, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!("vault_session_logins_total", "method" => method, "status" => status)
            .increment(1);
    }

    /// Record a background session refresh.
    pub fn record_session_refresh(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!("vault_session_refreshes_total", "status" => status).increment(1);
    }

    /// Set the number of lineages currently holding a lease.
    pub fn set_active_leases(&self, count: usize) {
        gauge!("vault_leases_active").set(count as f64);
    }

    fn describe(&self) {
        describe_counter!(
            "vault_lease_renewals_total",
            Unit::Count,
            "Successful lease renewals by renewal mode"
        );
        describe_counter!(
            "vault_lease_renewal_failures_total",
            Unit::Count,
            "Failed lease renewals by renewal mode"
        );
        describe_counter!("vault_lease_revocations_total", Unit::Count, "Lease revocations by outcome");
        describe_counter!(
            "vault_lease_rotations_total",
            Unit::Count,
            "Rotating secrets fetched again before expiry"
        );
        describe_counter!(
            "vault_session_logins_total",
            Unit::Count,
            "Logins by authentication method and outcome"
        );
        describe_counter!(
            "vault_session_refreshes_total",
            Unit::Count,
            "Background session token refreshes by outcome"
        );
        describe_gauge!("vault_leases_active", Unit::Count, "Lineages currently holding a lease");

        gauge!("vault_leases_active").set(0.0);
    }
}

/// Install the Prometheus exporter when metrics are enabled.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        Error::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| Error::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    LeaseMetrics::new().describe();

    info!(metrics_addr = %metrics_addr, service_name = %config.service_name, "Metrics collection initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_noop() {
        let metrics = LeaseMetrics::new();
        metrics.record_renewal("renew", true);
        metrics.record_renewal("rotate", false);
        metrics.record_revocation(true);
        metrics.record_rotation(false);
        metrics.record_login("approle", true);
        metrics.record_session_refresh(false);
        metrics.set_active_leases(3);
    }

    #[tokio::test]
    async fn test_init_metrics_disabled() {
        let config = ObservabilityConfig { enable_metrics: false, ..Default::default() };
        assert!(init_metrics(&config).is_ok());
    }

    #[tokio::test]
    async fn test_init_metrics_no_port() {
        let config = ObservabilityConfig { enable_metrics: true, metrics_port: 0, ..Default::default() };
        assert!(init_metrics(&config).is_ok());
    }
}
