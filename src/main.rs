//! kpurge: tear down all workload state in a Kubernetes cluster.

use std::io::{BufRead, IsTerminal, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use common::cli::utils::{handle_common_command, init_logging, load_config};
use common::cli::{Command, CommonArgs};
use common::config::{Configuration, ReleaseDriver};
use purger::cluster::KubeCluster;
use purger::cluster::kubernetes::{ClusterTarget, connect};
use purger::releases::helm::HelmCli;
use purger::releases::secrets::SecretReleases;
use purger::{CancelToken, ClusterApi, PurgeSettings, Purger, ReleaseManager};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Do not ask for confirmation
    #[arg(short = 'y', long)]
    yes: bool,

    /// Leave pods to namespace deletion
    #[arg(long)]
    skip_workloads: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Cancels `cancel` on SIGINT or SIGTERM.
async fn cancel_on_signal(cancel: CancelToken) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => tracing::warn!("Received SIGINT, stopping purge"),
            _ = sigterm.recv() => tracing::warn!("Received SIGTERM, stopping purge"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        tracing::warn!("Received Ctrl+C, stopping purge");
    }

    cancel.cancel();
    Ok(())
}

/// Ask before touching the cluster. Without a terminal there is nobody to ask.
fn confirm(target: &ClusterTarget) -> Result<bool> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        bail!("Refusing to purge without confirmation; pass --yes to run non-interactively");
    }

    let context = target.context.as_deref().unwrap_or("(in-cluster)");
    print!(
        "This deletes all releases, custom resources, pods and namespaces in context {context} ({}).\nContinue? [y/N] ",
        target.cluster_url
    );
    std::io::stdout().flush().context("Failed to write prompt")?;

    let mut answer = String::new();
    stdin
        .lock()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

async fn run(cli: Cli, config: Configuration) -> Result<()> {
    let mut settings =
        PurgeSettings::from_config(&config).context("Invalid purge settings")?;
    if cli.skip_workloads {
        settings = settings.without_workloads();
    }

    let (client, target) = connect(&config.kube).await?;
    tracing::info!(
        context = target.context.as_deref().unwrap_or("(in-cluster)"),
        url = %target.cluster_url,
        "Connected to cluster"
    );

    if config.confirm && !cli.yes && !confirm(&target)? {
        tracing::info!("Aborted");
        return Ok(());
    }

    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(client));
    let releases: Arc<dyn ReleaseManager> = match config.releases.driver {
        ReleaseDriver::Helm => Arc::new(
            HelmCli::new(config.releases.helm_binary.clone())
                .with_kube(config.kube.kubeconfig.clone(), config.kube.context.clone()),
        ),
        ReleaseDriver::Secrets => Arc::new(SecretReleases::new(cluster.clone())),
    };
    tracing::info!(driver = %config.releases.driver, "Using release driver");

    let cancel = CancelToken::new();
    let signals = tokio::spawn(cancel_on_signal(cancel.clone()));

    let result = Purger::new(cluster, releases, settings)
        .purge_with(&cancel)
        .await;
    signals.abort();

    result.context("Purge failed")
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.common);

    let result: Result<()> = async move {
        let config = load_config(cli.common.config.as_ref())?;
        let command = cli.command.clone().unwrap_or_default();
        if handle_common_command(&command, &config)? {
            return Ok(());
        }
        run(cli, config).await
    }
    .await;

    if let Err(err) = result {
        tracing::error!("{err:#}");
        std::process::exit(1);
    }
}
