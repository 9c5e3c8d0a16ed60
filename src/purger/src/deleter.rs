//! Delete a resource and make sure it is really gone.
//!
//! The protocol escalates at most once:
//!
//! 1. issue the delete (an already absent object is fine),
//! 2. wait for the object to disappear,
//! 3. if it is still there once the wait timed out, strip its finalizers,
//! 4. wait again; a second timeout is fatal.
//!
//! Finalizers are only stripped after a full wait so controllers that are
//! making progress get the chance to clean up on their own.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::cluster::{self, ClusterApi, DeleteOptions};
use crate::error::{Classify, ErrorClass, PurgeError};
use crate::resource::ResourceRef;
use crate::wait::{WaitOutcome, WaitPolicy, await_absence};

/// Result of one wait phase.
#[derive(Debug)]
pub enum DeletionOutcome {
    Terminated,
    TimedOut,
    Failed(PurgeError),
}

#[derive(Clone)]
pub struct EscalatingDeleter {
    cluster: Arc<dyn ClusterApi>,
    policy: WaitPolicy,
    options: DeleteOptions,
}

impl EscalatingDeleter {
    pub fn new(cluster: Arc<dyn ClusterApi>, policy: WaitPolicy) -> Self {
        Self {
            cluster,
            policy,
            options: DeleteOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DeleteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    pub async fn delete_and_confirm(
        &self,
        cancel: &CancelToken,
        resource: &ResourceRef,
    ) -> Result<(), PurgeError> {
        info!(%resource, "Deleting resource");
        match cancel
            .guard(self.cluster.delete(resource, &self.options))
            .await?
        {
            Ok(()) => {}
            Err(err) if err.class() == ErrorClass::NotFound => {
                debug!(%resource, "Resource already absent");
            }
            Err(source) => {
                return Err(PurgeError::Cluster {
                    context: format!("error deleting {resource}"),
                    source,
                });
            }
        }

        match self.wait_for_removal(cancel, resource).await {
            DeletionOutcome::Terminated => return Ok(()),
            DeletionOutcome::Failed(err) => return Err(err),
            DeletionOutcome::TimedOut => {}
        }

        warn!(
            %resource,
            timeout = ?self.policy.timeout(),
            "Resource did not terminate in time, removing its finalizers"
        );
        self.strip_finalizers(cancel, resource).await?;

        match self.wait_for_removal(cancel, resource).await {
            DeletionOutcome::Terminated => Ok(()),
            DeletionOutcome::Failed(err) => Err(err),
            DeletionOutcome::TimedOut => Err(PurgeError::Timeout {
                resource: resource.clone(),
            }),
        }
    }

    async fn wait_for_removal(&self, cancel: &CancelToken, resource: &ResourceRef) -> DeletionOutcome {
        let api = self.cluster.as_ref();
        let waited = await_absence(cancel, &self.policy, || cluster::exists(api, resource)).await;
        match waited {
            Ok(WaitOutcome::Terminated) => DeletionOutcome::Terminated,
            Ok(WaitOutcome::TimedOut) => DeletionOutcome::TimedOut,
            Err(err) if err.is_cancelled() => DeletionOutcome::Failed(err),
            Err(err) => DeletionOutcome::Failed(
                err.within(format!("error waiting for {resource} to terminate")),
            ),
        }
    }

    /// Clear the finalizer list of the live object.
    ///
    /// The object vanishing, or a conflicting write, both mean a controller
    /// already released it.
    async fn strip_finalizers(
        &self,
        cancel: &CancelToken,
        resource: &ResourceRef,
    ) -> Result<(), PurgeError> {
        let mut object = match cancel.guard(self.cluster.get(resource)).await? {
            Ok(object) => object,
            Err(err) if err.class() == ErrorClass::NotFound => return Ok(()),
            Err(source) => {
                return Err(PurgeError::Cluster {
                    context: format!("error getting {resource}"),
                    source,
                });
            }
        };

        object.metadata.finalizers = Some(Vec::new());
        match cancel
            .guard(self.cluster.replace(resource, &object))
            .await?
        {
            Ok(()) => Ok(()),
            Err(err) if matches!(err.class(), ErrorClass::NotFound | ErrorClass::Conflict) => {
                debug!(%resource, error = %err, "Finalizers already released");
                Ok(())
            }
            Err(source) => Err(PurgeError::Cluster {
                context: format!("error removing finalizers from {resource}"),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::CustomKind;
    use crate::testing::{InMemoryCluster, Op};
    use std::time::Duration;
    use tokio::time::Instant;

    fn kustomization(name: &str) -> ResourceRef {
        ResourceRef::custom(
            CustomKind {
                group: "kustomize.toolkit.fluxcd.io".to_string(),
                version: "v1".to_string(),
                kind: "Kustomization".to_string(),
                plural: "kustomizations".to_string(),
                namespaced: true,
            },
            Some("flux-system"),
            name,
        )
    }

    fn deleter(cluster: &InMemoryCluster) -> EscalatingDeleter {
        EscalatingDeleter::new(Arc::new(cluster.clone()), WaitPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_removal_skips_escalation() {
        let cluster = InMemoryCluster::new();
        let resource = kustomization("apps");
        cluster.insert(resource.clone(), &[], false);

        let start = Instant::now();
        deleter(&cluster)
            .delete_and_confirm(&CancelToken::new(), &resource)
            .await
            .unwrap();

        assert!(!cluster.contains(&resource));
        assert_eq!(cluster.calls(Op::Replace, "apps"), 0);
        assert_eq!(cluster.calls(Op::Get, "apps"), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_absent_is_success() {
        let cluster = InMemoryCluster::new();
        let resource = kustomization("gone");

        deleter(&cluster)
            .delete_and_confirm(&CancelToken::new(), &resource)
            .await
            .unwrap();
        assert_eq!(cluster.calls(Op::Replace, "gone"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_finalizer_is_stripped_once() {
        let cluster = InMemoryCluster::new();
        let resource = kustomization("apps");
        cluster.insert(resource.clone(), &["finalizers.fluxcd.io"], false);

        let start = Instant::now();
        deleter(&cluster)
            .delete_and_confirm(&CancelToken::new(), &resource)
            .await
            .unwrap();

        assert!(!cluster.contains(&resource));
        assert_eq!(cluster.calls(Op::Replace, "apps"), 1);
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resource_surviving_both_waits_times_out() {
        let cluster = InMemoryCluster::new();
        let resource = kustomization("apps");
        cluster.insert(resource.clone(), &["finalizers.fluxcd.io"], true);

        let err = deleter(&cluster)
            .delete_and_confirm(&CancelToken::new(), &resource)
            .await
            .unwrap_err();

        assert!(matches!(err, PurgeError::Timeout { .. }));
        assert_eq!(
            err.to_string(),
            "kustomize.toolkit.fluxcd.io/v1/kustomizations flux-system/apps did not terminate in time"
        );
        assert_eq!(cluster.calls(Op::Replace, "apps"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_while_stripping_counts_as_released() {
        let cluster = InMemoryCluster::new();
        let resource = kustomization("apps");
        cluster.insert(resource.clone(), &["finalizers.fluxcd.io"], true);
        cluster.fail_with_conflict(Op::Replace, "apps");

        let err = deleter(&cluster)
            .delete_and_confirm(&CancelToken::new(), &resource)
            .await
            .unwrap_err();

        // the conflict moves on to the second wait, which still times out here
        assert!(matches!(err, PurgeError::Timeout { .. }));
        assert_eq!(cluster.calls(Op::Replace, "apps"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_failure_is_fatal() {
        let cluster = InMemoryCluster::new();
        let resource = kustomization("apps");
        cluster.insert(resource.clone(), &[], false);
        cluster.fail(Op::Delete, "apps", "admission webhook denied the request");

        let err = deleter(&cluster)
            .delete_and_confirm(&CancelToken::new(), &resource)
            .await
            .unwrap_err();

        assert!(matches!(err, PurgeError::Cluster { .. }));
        assert_eq!(cluster.calls(Op::Get, "apps"), 0);
        assert!(cluster.contains(&resource));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_failure_is_fatal() {
        let cluster = InMemoryCluster::new();
        let resource = kustomization("apps");
        cluster.insert(resource.clone(), &["finalizers.fluxcd.io"], false);
        cluster.fail(Op::Replace, "apps", "forbidden");

        let err = deleter(&cluster)
            .delete_and_confirm(&CancelToken::new(), &resource)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "error removing finalizers from kustomize.toolkit.fluxcd.io/v1/kustomizations flux-system/apps"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_is_forwarded() {
        let cluster = InMemoryCluster::new();
        cluster.add_pod("team-a", "web");

        deleter(&cluster)
            .with_options(DeleteOptions::with_grace_period(0))
            .delete_and_confirm(&CancelToken::new(), &ResourceRef::pod("team-a", "web"))
            .await
            .unwrap();

        assert_eq!(
            cluster.last_delete_options("web"),
            Some(DeleteOptions::with_grace_period(0))
        );
    }
}
