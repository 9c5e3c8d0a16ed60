use kube::ResourceExt;
use tracing::info;

use crate::cancel::CancelToken;
use crate::cluster::{ClusterApi, DeleteOptions};
use crate::error::PurgeError;
use crate::namespaces::NamespaceSet;
use crate::resource::{ResourceKind, ResourceRef};

/// Delete every pod in `namespaces`, one at a time.
///
/// Pods are not awaited: namespace teardown waits for everything that is
/// left. The first failed delete stops the stage.
pub async fn teardown_workloads(
    cluster: &dyn ClusterApi,
    namespaces: &NamespaceSet,
    grace_period_seconds: u32,
    cancel: &CancelToken,
) -> Result<(), PurgeError> {
    let options = DeleteOptions::with_grace_period(grace_period_seconds);

    for namespace in namespaces.iter() {
        let pods = cancel
            .guard(cluster.list(&ResourceKind::Pod, Some(namespace)))
            .await?
            .map_err(PurgeError::cluster(format!(
                "error getting pods in namespace {namespace}"
            )))?;

        for pod in pods {
            let name = pod.name_any();
            info!(namespace, pod = %name, "Deleting pod");
            match cancel
                .guard(cluster.delete(&ResourceRef::pod(namespace, name.as_str()), &options))
                .await?
            {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(source) => {
                    return Err(PurgeError::Cluster {
                        context: format!("error deleting pod {name} in namespace {namespace}"),
                        source,
                    });
                }
            }
        }
    }
    Ok(())
}
