//! Releases read straight from their persisted records.
//!
//! Uninstalling through this driver removes the release state without running
//! chart hooks. The resources the chart created are left to the later stages.

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;

use super::{ReleaseManager, delete_release_records, release_of_record, unique_releases};
use crate::cancel::CancelToken;
use crate::cluster::ClusterApi;
use crate::error::{ClusterError, PurgeError};
use crate::resource::ResourceKind;

#[derive(Clone)]
pub struct SecretReleases {
    cluster: Arc<dyn ClusterApi>,
}

impl SecretReleases {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl ReleaseManager for SecretReleases {
    async fn list_releases(&self, namespace: &str) -> Result<Vec<String>, ClusterError> {
        let secrets = self
            .cluster
            .list(&ResourceKind::Secret, Some(namespace))
            .await?;
        Ok(unique_releases(secrets.iter().filter_map(|s| {
            let name = s.name_any();
            release_of_record(&name).map(str::to_string)
        })))
    }

    async fn uninstall(
        &self,
        namespace: &str,
        release: &str,
        cancel: &CancelToken,
    ) -> Result<(), ClusterError> {
        let deleted = delete_release_records(self.cluster.as_ref(), cancel, namespace, release)
            .await
            .map_err(|err| match err {
                PurgeError::Cluster { source, .. } => source,
                other => ClusterError::other(other.to_string()),
            })?;
        if deleted == 0 {
            return Err(ClusterError::NotFound(format!("release {release}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryCluster;

    #[tokio::test]
    async fn test_lists_each_release_once() {
        let cluster = InMemoryCluster::new();
        cluster
            .add_secret("team-a", "sh.helm.release.v1.web.v1")
            .add_secret("team-a", "sh.helm.release.v1.web.v2")
            .add_secret("team-a", "sh.helm.release.v1.db.v1")
            .add_secret("team-a", "registry-credentials")
            .add_secret("team-b", "sh.helm.release.v1.cache.v1");

        let releases = SecretReleases::new(Arc::new(cluster));
        assert_eq!(releases.list_releases("team-a").await.unwrap(), vec!["db", "web"]);
    }

    #[tokio::test]
    async fn test_uninstall_removes_records() {
        let cluster = InMemoryCluster::new();
        cluster.add_secret("team-a", "sh.helm.release.v1.web.v1");
        let releases = SecretReleases::new(Arc::new(cluster.clone()));

        let cancel = CancelToken::new();
        releases.uninstall("team-a", "web", &cancel).await.unwrap();
        assert!(cluster.names(&ResourceKind::Secret).is_empty());

        let err = releases.uninstall("team-a", "web", &cancel).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cancelled_uninstall_keeps_records() {
        let cluster = InMemoryCluster::new();
        cluster.add_secret("team-a", "sh.helm.release.v1.web.v1");
        let releases = SecretReleases::new(Arc::new(cluster.clone()));
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = releases.uninstall("team-a", "web", &cancel).await.unwrap_err();
        assert_eq!(err.to_string(), "operation cancelled");
        assert_eq!(
            cluster.names(&ResourceKind::Secret),
            vec!["sh.helm.release.v1.web.v1"]
        );
    }
}
