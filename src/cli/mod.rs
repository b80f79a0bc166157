//! # Command Line Interface
//!
//! `watch` keeps secrets leased until interrupted, `read` performs a single
//! fetch, and `config` prints the resolved configuration.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::observability::{init_observability, log_config_info};
use crate::secrets::{
    authentication_from_config, AuthenticationEvent, Lease, LeaseAwareSecretSource, LeaseOperations,
    RequestedSecret, SecretLeaseContainer, SecretLeaseEvent, SessionManager, SourceOptions,
    VaultLeaseOperations, VaultTokenOperations,
};

#[derive(Parser)]
#[command(name = "vault-lease")]
#[command(about = "Keeps HashiCorp Vault secret leases renewed")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Vault address override
    #[arg(long, global = true)]
    pub vault_addr: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Lease secrets and keep them renewed until interrupted
    Watch {
        /// Path of a secret whose lease is renewed
        #[arg(long = "renewable", value_name = "PATH")]
        renewable: Vec<String>,

        /// Path of a secret that is fetched again when its lease runs out
        #[arg(long = "rotating", value_name = "PATH")]
        rotating: Vec<String>,

        /// Exit when an initial fetch fails
        #[arg(long)]
        fail_fast: bool,

        /// Prefix for property names
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Fetch a secret once and print its lease and property names
    Read {
        /// Secret path, e.g. database/creds/readonly
        path: String,

        /// Revoke the lease after printing
        #[arg(long)]
        revoke: bool,
    },

    /// Print the resolved configuration (credentials omitted)
    Config,
}

#[derive(Debug, Serialize)]
struct ReadOutput {
    path: String,
    lease_id: String,
    lease_duration_secs: u64,
    renewable: bool,
    keys: Vec<String>,
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if let Some(address) = cli.vault_addr {
        config.vault.address = address;
    }
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }

    init_observability(&config.observability).context("Failed to initialize observability")?;

    match cli.command {
        Commands::Watch { renewable, rotating, fail_fast, prefix } => {
            let requested = renewable
                .into_iter()
                .map(RequestedSecret::renewable)
                .chain(rotating.into_iter().map(RequestedSecret::rotating))
                .collect();
            let mut options = if fail_fast { SourceOptions::fail_fast() } else { SourceOptions::default() };
            if let Some(prefix) = prefix {
                options = options.with_prefix(prefix);
            }
            handle_watch(&config, requested, options).await?
        }
        Commands::Read { path, revoke } => handle_read(&config, &path, revoke).await?,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config).context("Failed to serialize configuration")?)
        }
    }

    Ok(())
}

fn session_from_config(config: &AppConfig) -> anyhow::Result<SessionManager> {
    config.validate().context("Invalid configuration")?;
    let authentication = authentication_from_config(&config.vault)
        .context("No Vault authentication configured")?;
    let token_operations = Arc::new(VaultTokenOperations::new(config.vault.clone()));
    Ok(SessionManager::new(authentication, token_operations, config.session.settings()))
}

async fn handle_watch(
    config: &AppConfig,
    requested: Vec<RequestedSecret>,
    options: SourceOptions,
) -> anyhow::Result<()> {
    if requested.is_empty() {
        anyhow::bail!("Nothing to watch: pass at least one --renewable or --rotating path");
    }

    let session = session_from_config(config)?;
    log_config_info(config);

    session.add_listener(|event| match event {
        AuthenticationEvent::RefreshFailed { error } => warn!(error = %error, "Session token refresh failed"),
        other => info!(event = ?other, "Session event"),
    });

    let operations = VaultLeaseOperations::new(config.vault.clone(), Arc::new(session.clone()))?;
    let container = SecretLeaseContainer::new(Arc::new(operations), config.lease.settings());
    container.add_lease_listener(|event| match event {
        SecretLeaseEvent::Created { requested, data, .. } => {
            info!(requested = %requested, properties = ?data.keys().collect::<Vec<_>>(), "Secret data refreshed")
        }
        SecretLeaseEvent::Expired { requested, .. } => warn!(requested = %requested, "Secret lease expired"),
        SecretLeaseEvent::NotFound { requested } => warn!(requested = %requested, "Secret not found"),
        other => info!(requested = %other.requested(), "Secret lease event"),
    });

    let mut sources = Vec::with_capacity(requested.len());
    for secret in requested {
        match LeaseAwareSecretSource::bind(&container, secret, options.clone()).await {
            Ok(source) => {
                info!(
                    requested = %source.requested(),
                    state = ?source.state(),
                    properties = ?source.property_names(),
                    "Watching secret"
                );
                sources.push(source);
            }
            Err(e) => {
                container.destroy().await;
                session.destroy().await;
                return Err(e).context("Initial secret fetch failed");
            }
        }
    }

    signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, revoking leases");

    for source in &sources {
        source.close();
    }
    container.destroy().await;
    session.destroy().await;
    Ok(())
}

async fn handle_read(config: &AppConfig, path: &str, revoke: bool) -> anyhow::Result<()> {
    let session = session_from_config(config)?;
    let operations = VaultLeaseOperations::new(config.vault.clone(), Arc::new(session.clone()))?;

    let result = operations.fetch(path).await;
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            session.destroy().await;
            return Err(e).with_context(|| format!("Failed to read {}", path));
        }
    };

    let lease = Lease::from_response(&response);
    let output = ReadOutput {
        path: path.to_string(),
        lease_id: lease.lease_id().to_string(),
        lease_duration_secs: lease.lease_duration().as_secs(),
        renewable: lease.is_renewable(),
        keys: response.flattened_data().into_keys().collect(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    if revoke && lease.has_lease_id() {
        if let Err(e) = operations.revoke(&lease).await {
            warn!(lease_id = %lease.lease_id(), error = %e, "Failed to revoke lease");
        }
    }
    session.destroy().await;
    Ok(())
}
