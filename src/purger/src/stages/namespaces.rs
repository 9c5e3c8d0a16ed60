use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::cluster::{ClusterApi, DeleteOptions};
use crate::error::PurgeError;
use crate::fanout::run_all;
use crate::namespaces::NamespaceSet;
use crate::resource::ResourceRef;

/// Delete every non-default namespace and wait until none is listed anymore.
///
/// The set is discovered again here, and on every poll, since earlier stages
/// never change it and the deletions below do.
pub async fn teardown_namespaces(
    cluster: Arc<dyn ClusterApi>,
    cancel: &CancelToken,
    timeout: Duration,
    poll_interval: Duration,
    limit: Option<usize>,
) -> Result<(), PurgeError> {
    let targets = cancel
        .guard(NamespaceSet::discover(cluster.as_ref()))
        .await??
        .non_default();
    info!(count = targets.len(), "Deleting namespaces");

    let deletions = targets.to_vec().into_iter().map(|name| {
        let cluster = cluster.clone();
        move |cancel: CancelToken| async move {
            let namespace = ResourceRef::namespace(name.as_str());
            match cancel
                .guard(cluster.delete(&namespace, &DeleteOptions::default()))
                .await?
            {
                Ok(()) => Ok(()),
                Err(err) if err.is_not_found() => Ok(()),
                Err(source) => Err(PurgeError::Cluster {
                    context: format!("failed to delete namespace {name}"),
                    source,
                }),
            }
        }
    });
    run_all(cancel, limit, deletions).await?;

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = cancel
            .guard(NamespaceSet::discover(cluster.as_ref()))
            .await??
            .non_default();
        if remaining.is_empty() {
            info!("All namespaces deleted");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(PurgeError::NamespacesRemain {
                remaining: remaining.to_vec(),
                waited: timeout,
            });
        }
        debug!(remaining = remaining.len(), "Waiting for namespaces to terminate");
        cancel.sleep(poll_interval).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;
    use crate::testing::{InMemoryCluster, Op};

    async fn run(cluster: &InMemoryCluster) -> Result<(), PurgeError> {
        teardown_namespaces(
            Arc::new(cluster.clone()),
            &CancelToken::new(),
            Duration::from_secs(300),
            Duration::from_secs(2),
            None,
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletes_everything_but_default_and_reserved() {
        let cluster = InMemoryCluster::new();
        cluster
            .add_namespace("default")
            .add_namespace("kube-system")
            .add_namespace("team-a")
            .add_namespace("team-b")
            .add_pod("team-a", "web");

        run(&cluster).await.unwrap();

        assert_eq!(
            cluster.names(&ResourceKind::Namespace),
            vec!["default", "kube-system"]
        );
        assert_eq!(cluster.calls(Op::Delete, "default"), 0);
        assert_eq!(cluster.calls(Op::Delete, "kube-system"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_terminating_namespaces() {
        let cluster = InMemoryCluster::new();
        cluster.add_namespace("team-a");
        cluster.insert(
            ResourceRef::namespace("team-b"),
            &["kubernetes"],
            true,
        );

        let started = Instant::now();
        let err = run(&cluster).await.unwrap_err();

        match err {
            PurgeError::NamespacesRemain { remaining, waited } => {
                assert_eq!(remaining, vec!["team-b".to_string()]);
                assert_eq!(waited, Duration::from_secs(300));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(300));
        assert!(!cluster.contains(&ResourceRef::namespace("team-a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_failure_is_fatal() {
        let cluster = InMemoryCluster::new();
        cluster.add_namespace("team-a");
        cluster.fail(Op::Delete, "team-a", "the server is currently unable to handle the request");

        let err = run(&cluster).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to delete namespace team-a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_the_wait() {
        let cluster = InMemoryCluster::new();
        cluster.insert(ResourceRef::namespace("team-a"), &["kubernetes"], true);
        let cancel = CancelToken::new();

        let task = tokio::spawn({
            let cluster: Arc<dyn ClusterApi> = Arc::new(cluster.clone());
            let cancel = cancel.clone();
            async move {
                teardown_namespaces(
                    cluster,
                    &cancel,
                    Duration::from_secs(300),
                    Duration::from_secs(2),
                    None,
                )
                .await
            }
        });
        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();

        assert!(task.await.unwrap().unwrap_err().is_cancelled());
    }
}
