use std::sync::Arc;

use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::cluster::ClusterApi;
use crate::error::PurgeError;
use crate::fanout::FanOut;
use crate::namespaces::NamespaceSet;
use crate::releases::{ReleaseManager, delete_release_records, unique_releases};

/// Uninstall every release in every namespace, all namespaces at once.
pub async fn teardown_releases(
    cluster: Arc<dyn ClusterApi>,
    releases: Arc<dyn ReleaseManager>,
    namespaces: &NamespaceSet,
    cancel: &CancelToken,
    limit: Option<usize>,
) -> Result<(), PurgeError> {
    let mut fanout = FanOut::with_limit(cancel, limit);
    for namespace in namespaces.iter() {
        let namespace = namespace.to_string();
        let cluster = cluster.clone();
        let releases = releases.clone();
        fanout.spawn(move |cancel| async move {
            purge_namespace(cluster, releases, &namespace, &cancel, limit).await
        });
    }
    fanout.wait().await
}

async fn purge_namespace(
    cluster: Arc<dyn ClusterApi>,
    releases: Arc<dyn ReleaseManager>,
    namespace: &str,
    cancel: &CancelToken,
    limit: Option<usize>,
) -> Result<(), PurgeError> {
    info!(namespace, "Purging releases");
    let names = cancel
        .guard(releases.list_releases(namespace))
        .await?
        .map_err(PurgeError::cluster(format!(
            "failed to list releases in namespace {namespace}"
        )))?;

    let mut fanout = FanOut::with_limit(cancel, limit);
    for release in unique_releases(names) {
        let cluster = cluster.clone();
        let releases = releases.clone();
        let namespace = namespace.to_string();
        fanout.spawn(move |cancel| async move {
            uninstall(cluster.as_ref(), releases.as_ref(), &namespace, &release, &cancel)
                .await
                .map_err(|e| e.within(format!("failed to uninstall release {release}")))
        });
    }
    fanout
        .wait()
        .await
        .map_err(|e| e.within(format!("failed to uninstall releases in namespace {namespace}")))
}

/// Uninstall `release`, falling back to deleting its records when the
/// package manager cannot.
async fn uninstall(
    cluster: &dyn ClusterApi,
    releases: &dyn ReleaseManager,
    namespace: &str,
    release: &str,
    cancel: &CancelToken,
) -> Result<(), PurgeError> {
    info!(release, namespace, "Uninstalling release");
    match cancel.guard(releases.uninstall(namespace, release, cancel)).await? {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(
                release,
                namespace,
                error = %err,
                "Failed to uninstall release, deleting its records"
            );
            delete_release_records(cluster, cancel, namespace, release).await?;
            Ok(())
        }
    }
}
