//! Drives the four purge stages in order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::config::Configuration;
use tokio::time::Instant;
use tracing::{error, info};

use crate::cancel::CancelToken;
use crate::cluster::ClusterApi;
use crate::deleter::EscalatingDeleter;
use crate::error::{PurgeError, Stage};
use crate::namespaces::NamespaceSet;
use crate::releases::ReleaseManager;
use crate::stages::{
    teardown_custom_resources, teardown_namespaces, teardown_releases, teardown_workloads,
};
use crate::wait::WaitPolicy;

/// Everything a run needs besides its collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeSettings {
    pub wait: WaitPolicy,
    /// Definitions whose name ends with this suffix are purged.
    pub schema_suffix: String,
    /// Grace period for pod deletion, `None` skips the workload stage.
    pub workload_grace_period: Option<u32>,
    pub namespace_timeout: Duration,
    pub namespace_poll_interval: Duration,
    pub max_parallel: Option<usize>,
}

impl Default for PurgeSettings {
    fn default() -> Self {
        Self {
            wait: WaitPolicy::default(),
            schema_suffix: "toolkit.fluxcd.io".to_string(),
            workload_grace_period: Some(0),
            namespace_timeout: Duration::from_secs(300),
            namespace_poll_interval: Duration::from_secs(2),
            max_parallel: None,
        }
    }
}

impl PurgeSettings {
    pub fn from_config(config: &Configuration) -> Result<Self, PurgeError> {
        Ok(Self {
            wait: WaitPolicy::new(config.wait.timeout, config.wait.poll_interval)?,
            schema_suffix: config.custom_resources.schema_suffix.clone(),
            workload_grace_period: config
                .workloads
                .enabled
                .then_some(config.workloads.grace_period_seconds),
            namespace_timeout: config.namespaces.timeout,
            namespace_poll_interval: config.namespaces.poll_interval,
            max_parallel: config.concurrency.max_parallel,
        })
    }

    pub fn without_workloads(mut self) -> Self {
        self.workload_grace_period = None;
        self
    }
}

pub struct Purger {
    cluster: Arc<dyn ClusterApi>,
    releases: Arc<dyn ReleaseManager>,
    settings: PurgeSettings,
}

impl Purger {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        releases: Arc<dyn ReleaseManager>,
        settings: PurgeSettings,
    ) -> Self {
        Self {
            cluster,
            releases,
            settings,
        }
    }

    pub fn settings(&self) -> &PurgeSettings {
        &self.settings
    }

    /// Purge the cluster with no way to stop early.
    pub async fn purge(&self) -> Result<(), PurgeError> {
        self.purge_with(&CancelToken::new()).await
    }

    /// Run every stage in order. The first failing stage ends the run.
    pub async fn purge_with(&self, cancel: &CancelToken) -> Result<(), PurgeError> {
        let started = Instant::now();
        let limit = self.settings.max_parallel;

        let namespaces = cancel
            .guard(NamespaceSet::discover(self.cluster.as_ref()))
            .await??;
        info!(namespaces = namespaces.len(), "Starting purge");

        run_stage(
            Stage::Releases,
            teardown_releases(
                self.cluster.clone(),
                self.releases.clone(),
                &namespaces,
                cancel,
                limit,
            ),
        )
        .await?;

        let deleter = EscalatingDeleter::new(self.cluster.clone(), self.settings.wait);
        run_stage(
            Stage::CustomResources,
            teardown_custom_resources(
                self.cluster.clone(),
                deleter,
                &self.settings.schema_suffix,
                &namespaces,
                cancel,
                limit,
            ),
        )
        .await?;

        match self.settings.workload_grace_period {
            Some(grace) => {
                run_stage(
                    Stage::Workloads,
                    teardown_workloads(self.cluster.as_ref(), &namespaces, grace, cancel),
                )
                .await?
            }
            None => info!("Skipping workload teardown"),
        }

        run_stage(
            Stage::Namespaces,
            teardown_namespaces(
                self.cluster.clone(),
                cancel,
                self.settings.namespace_timeout,
                self.settings.namespace_poll_interval,
                limit,
            ),
        )
        .await?;

        info!(elapsed = ?started.elapsed(), "Purge completed");
        Ok(())
    }
}

async fn run_stage<F>(stage: Stage, fut: F) -> Result<(), PurgeError>
where
    F: Future<Output = Result<(), PurgeError>>,
{
    info!(%stage, "Starting stage");
    let started = Instant::now();
    match fut.await {
        Ok(()) => {
            info!(%stage, elapsed = ?started.elapsed(), "Stage completed");
            Ok(())
        }
        Err(err) => {
            error!(%stage, error = %err, "Stage failed");
            Err(PurgeError::Stage {
                stage,
                source: Box::new(err),
            })
        }
    }
}
