//! Releases managed through the `helm` executable.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{ReleaseManager, unique_releases};
use crate::cancel::CancelToken;
use crate::error::ClusterError;

/// Every release in every state. `--max 0` lifts helm's default page size of 256.
pub const LIST_ARGS: [&str; 6] = ["list", "--all", "--max", "0", "--output", "json"];

#[derive(Debug, Deserialize)]
struct ListedRelease {
    name: String,
}

/// Parse the output of `helm list --output json`.
pub fn parse_release_list(output: &[u8]) -> Result<Vec<String>, ClusterError> {
    // helm prints nothing at all when there are no releases
    if output.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let listed: Vec<ListedRelease> = serde_json::from_slice(output)
        .map_err(|e| ClusterError::other(format!("unexpected helm list output: {e}")))?;
    Ok(unique_releases(listed.into_iter().map(|r| r.name)))
}

#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: PathBuf,
    kubeconfig: Option<PathBuf>,
    kube_context: Option<String>,
}

impl HelmCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            kubeconfig: None,
            kube_context: None,
        }
    }

    /// Point helm at the same cluster as the API client.
    pub fn with_kube(mut self, kubeconfig: Option<PathBuf>, context: Option<String>) -> Self {
        self.kubeconfig = kubeconfig;
        self.kube_context = context;
        self
    }

    pub fn command(&self, namespace: &str, args: &[&str]) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(args).arg("--namespace").arg(namespace);
        if let Some(kubeconfig) = &self.kubeconfig {
            command.arg("--kubeconfig").arg(kubeconfig);
        }
        if let Some(context) = &self.kube_context {
            command.arg("--kube-context").arg(context);
        }
        command.kill_on_drop(true);
        command
    }

    async fn run(&self, namespace: &str, args: &[&str]) -> Result<Vec<u8>, ClusterError> {
        debug!(binary = %self.binary.display(), ?args, namespace, "Running helm");
        let output = self
            .command(namespace, args)
            .output()
            .await
            .map_err(|e| {
                ClusterError::other(format!(
                    "failed to run {}: {e}",
                    self.binary.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClusterError::other(format!(
                "helm {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl ReleaseManager for HelmCli {
    async fn list_releases(&self, namespace: &str) -> Result<Vec<String>, ClusterError> {
        let stdout = self.run(namespace, &LIST_ARGS).await?;
        parse_release_list(&stdout)
    }

    async fn uninstall(
        &self,
        namespace: &str,
        release: &str,
        cancel: &CancelToken,
    ) -> Result<(), ClusterError> {
        // dropping `run` kills the helm process
        match cancel.guard(self.run(namespace, &["uninstall", release])).await {
            Ok(output) => output.map(|_| ()),
            Err(err) => Err(ClusterError::other(err.to_string())),
        }
    }
}
