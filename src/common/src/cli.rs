use clap::{Args, Subcommand};
use std::path::PathBuf;

/// CLI arguments shared by every kpurge invocation
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, Default, PartialEq, Eq)]
pub enum Command {
    /// Purge the cluster (default behavior)
    #[default]
    Purge,
    /// Show the effective configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
}

pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Log level implied by the verbosity flags
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging. `RUST_LOG` takes precedence over the CLI flags.
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration");
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    pub fn render_config(config: &Configuration, json: bool) -> Result<String> {
        if json {
            return serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON");
        }

        let kubeconfig = config
            .kube
            .kubeconfig
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(inferred)".to_string());
        let context = config.kube.context.as_deref().unwrap_or("(current)");
        let parallel = config
            .concurrency
            .max_parallel
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unbounded".to_string());

        let mut out = String::new();
        out.push_str("kpurge configuration:\n");
        out.push_str("=====================\n");
        out.push_str(&format!("Kubeconfig: {kubeconfig}\n"));
        out.push_str(&format!("Context: {context}\n"));
        out.push_str(&format!(
            "Wait: timeout {:?}, poll every {:?}\n",
            config.wait.timeout, config.wait.poll_interval
        ));
        out.push_str(&format!(
            "Custom resource suffix: {}\n",
            config.custom_resources.schema_suffix
        ));
        out.push_str(&format!("Release driver: {}\n", config.releases.driver));
        out.push_str(&format!(
            "Workload teardown: {} (grace period {}s)\n",
            if config.workloads.enabled { "enabled" } else { "disabled" },
            config.workloads.grace_period_seconds
        ));
        out.push_str(&format!(
            "Namespace teardown: timeout {:?}, poll every {:?}\n",
            config.namespaces.timeout, config.namespaces.poll_interval
        ));
        out.push_str(&format!("Max parallel deletions: {parallel}\n"));
        out.push_str(&format!("Confirm: {}\n", config.confirm));
        Ok(out)
    }

    pub fn validate_config(config: &Configuration) -> Result<()> {
        tracing::info!("Validating configuration...");
        config.validate().context("Configuration is invalid")?;
        tracing::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle commands that don't touch the cluster.
    ///
    /// Returns `true` when the command was handled and the process should exit.
    pub fn handle_common_command(command: &Command, config: &Configuration) -> Result<bool> {
        match command {
            Command::Config { json } => {
                print!("{}", render_config(config, *json)?);
                Ok(true)
            }
            Command::Validate => {
                validate_config(config)?;
                Ok(true)
            }
            Command::Purge => Ok(false),
        }
    }
}
