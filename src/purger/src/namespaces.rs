//! The namespaces a purge operates on.

use std::collections::BTreeSet;

use kube::ResourceExt;

use crate::cluster::ClusterApi;
use crate::error::PurgeError;
use crate::resource::ResourceKind;

/// Namespaces owned by the control plane itself. They are never touched.
pub const RESERVED_NAMESPACES: [&str; 3] = ["kube-system", "kube-public", "kube-node-lease"];

/// Purged like any other namespace, but never deleted.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Ordered set of namespace names without the reserved ones.
///
/// A snapshot: it is not updated when the purge itself deletes namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceSet {
    names: BTreeSet<String>,
}

impl NamespaceSet {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names
            .into_iter()
            .map(Into::into)
            .filter(|name: &String| !RESERVED_NAMESPACES.contains(&name.as_str()))
            .collect();
        Self { names }
    }

    pub async fn discover(cluster: &dyn ClusterApi) -> Result<Self, PurgeError> {
        let namespaces = cluster
            .list(&ResourceKind::Namespace, None)
            .await
            .map_err(PurgeError::cluster("failed to retrieve namespaces"))?;
        Ok(Self::from_names(namespaces.iter().map(|ns| ns.name_any())))
    }

    /// The subset that may be deleted: everything except `default`.
    pub fn non_default(&self) -> NamespaceSet {
        Self {
            names: self
                .names
                .iter()
                .filter(|name| name.as_str() != DEFAULT_NAMESPACE)
                .cloned()
                .collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryCluster, Op};

    #[test]
    fn test_reserved_and_default_exclusion() {
        let all = NamespaceSet::from_names([
            "default",
            "kube-system",
            "kube-public",
            "kube-node-lease",
            "team-a",
        ]);
        assert_eq!(all.to_vec(), vec!["default", "team-a"]);

        let deletable = all.non_default();
        assert_eq!(deletable.to_vec(), vec!["team-a"]);
        assert!(!deletable.contains("default"));
    }

    #[tokio::test]
    async fn test_discover_lists_namespaces() {
        let cluster = InMemoryCluster::new();
        cluster
            .add_namespace("kube-system")
            .add_namespace("default")
            .add_namespace("team-b")
            .add_namespace("team-a");

        let namespaces = NamespaceSet::discover(&cluster).await.unwrap();
        assert_eq!(namespaces.to_vec(), vec!["default", "team-a", "team-b"]);
        assert_eq!(namespaces.len(), 3);
    }

    #[tokio::test]
    async fn test_discover_failure_is_reported() {
        let cluster = InMemoryCluster::new();
        cluster.fail(Op::List, "namespace", "unauthorized");

        let err = NamespaceSet::discover(&cluster).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to retrieve namespaces");
    }
}
