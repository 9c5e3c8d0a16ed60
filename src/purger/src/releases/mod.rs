//! Package-manager releases and the records they persist in the cluster.

use std::collections::BTreeSet;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

use crate::cancel::CancelToken;
use crate::cluster::{ClusterApi, DeleteOptions};
use crate::error::{ClusterError, PurgeError};
use crate::resource::{ResourceKind, ResourceRef};

pub mod helm;
pub mod secrets;

pub use helm::HelmCli;
pub use secrets::SecretReleases;

/// Name prefix of the secrets holding helm release state.
pub const RELEASE_RECORD_PREFIX: &str = "sh.helm.release.v1.";

#[async_trait]
pub trait ReleaseManager: Send + Sync {
    /// Names of the releases in `namespace`, in any state.
    async fn list_releases(&self, namespace: &str) -> Result<Vec<String>, ClusterError>;

    /// Remove `release` from `namespace`, stopping early once `cancel` fires.
    async fn uninstall(
        &self,
        namespace: &str,
        release: &str,
        cancel: &CancelToken,
    ) -> Result<(), ClusterError>;
}

/// Prefix shared by every revision record of `release`.
pub fn record_prefix(release: &str) -> String {
    format!("{RELEASE_RECORD_PREFIX}{release}.v")
}

/// Release name encoded in a record secret name such as `sh.helm.release.v1.web.v3`.
pub fn release_of_record(secret: &str) -> Option<&str> {
    let rest = secret.strip_prefix(RELEASE_RECORD_PREFIX)?;
    let (release, revision) = rest.rsplit_once(".v")?;
    if release.is_empty() || revision.is_empty() || !revision.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(release)
}

/// Collapse release names to a sorted, duplicate-free list.
pub fn unique_releases<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names
        .into_iter()
        .map(Into::into)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Delete every persisted record of `release` in `namespace`.
///
/// Returns how many records were removed. Records already gone are ignored.
pub async fn delete_release_records(
    cluster: &dyn ClusterApi,
    cancel: &CancelToken,
    namespace: &str,
    release: &str,
) -> Result<usize, PurgeError> {
    let secrets = cancel
        .guard(cluster.list(&ResourceKind::Secret, Some(namespace)))
        .await?
        .map_err(PurgeError::cluster(format!(
            "failed to list secrets in namespace {namespace}"
        )))?;

    let prefix = record_prefix(release);
    let mut deleted = 0;
    for secret in secrets {
        let name = secret.name_any();
        if !name.starts_with(&prefix) {
            continue;
        }
        info!(secret = %name, release, namespace, "Deleting release record");
        let record = ResourceRef::secret(namespace, name.as_str());
        match cancel
            .guard(cluster.delete(&record, &DeleteOptions::default()))
            .await?
        {
            Ok(()) => deleted += 1,
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                return Err(PurgeError::Cluster {
                    context: format!("failed to delete secret {name}"),
                    source: err,
                });
            }
        }
    }
    Ok(deleted)
}
