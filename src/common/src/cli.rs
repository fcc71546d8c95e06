use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared across all binaries
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Common subcommands available for all services
#[derive(Subcommand, Debug, Clone, Default)]
pub enum CommonCommands {
    /// Start the service (default behavior)
    #[default]
    Start,
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use crate::storage::{redact_dsn, storage_dsn_to_path};
    use anyhow::{Context, Result};
    use std::net::SocketAddr;
    use tracing_subscriber::EnvFilter;

    /// The filter directive implied by `--verbose` / `--quiet`.
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments. `RUST_LOG` wins when set.
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));

        // A subscriber may already be installed by an embedding process
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let mut shown = config.clone();
            shown.storage.dsn = redact_dsn(&shown.storage.dsn);
            shown.acceptor.auth_token = shown.acceptor.auth_token.map(|_| "****".to_string());

            let json = serde_json::to_string_pretty(&shown)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("Archivist Configuration:");
            println!("========================");
            println!("Storage DSN: {}", redact_dsn(&config.storage.dsn));
            println!(
                "Bucket: {}",
                config.resolve_bucket().as_deref().unwrap_or("(derived from DSN)")
            );
            println!("Canonical key: {}", config.layout.canonical_key);
            println!("Pending prefix: {}", config.layout.pending_prefix);

            if config.compactor.enabled {
                println!(
                    "Compactor tick interval: {:?}",
                    config.compactor.tick_interval
                );
            } else {
                println!("Compactor: disabled");
            }

            if config.compactor.lease.enabled {
                println!(
                    "Compaction lease: {} (ttl {:?})",
                    config.layout.lease_key, config.compactor.lease.ttl
                );
            } else {
                println!("Compaction lease: disabled");
            }

            println!("Acceptor listen address: {}", config.acceptor.listen_addr);
            println!(
                "Acceptor auth: {}",
                if config.resolve_auth_token().is_some() {
                    "token required"
                } else {
                    "disabled"
                }
            );
            println!("CORS allow origin: {}", config.acceptor.cors_allow_origin);
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        tracing::info!("Validating configuration...");

        if config.storage.dsn.is_empty() {
            anyhow::bail!("Storage DSN cannot be empty");
        }

        let location = storage_dsn_to_path(&config.storage.dsn)?;
        if location.starts_with("s3://") && config.resolve_bucket().is_none() {
            anyhow::bail!("S3 storage needs a bucket: storage.bucket, BUCKET_NAME or s3://host/bucket");
        }

        for (name, key) in [
            ("layout.canonical_key", &config.layout.canonical_key),
            ("layout.pending_prefix", &config.layout.pending_prefix),
            ("layout.lease_key", &config.layout.lease_key),
        ] {
            if key.trim_matches('/').is_empty() {
                anyhow::bail!("{name} cannot be empty");
            }
        }

        if config.compactor.tick_interval.is_zero() {
            anyhow::bail!("compactor.tick_interval must be greater than zero");
        }

        config.compactor.lease.check_ttl()?;

        config
            .acceptor
            .listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid acceptor.listen_addr '{}'", config.acceptor.listen_addr))?;

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Handle common CLI commands that don't require starting services
    pub async fn handle_common_command(
        command: &CommonCommands,
        config: &Configuration,
    ) -> Result<bool> {
        match command {
            CommonCommands::Config { json } => {
                display_config(config, *json)?;
                Ok(true)
            }
            CommonCommands::Validate => {
                validate_config(config)?;
                Ok(true)
            }
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(true)
            }
            CommonCommands::Start => Ok(false),
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
