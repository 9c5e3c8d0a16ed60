//! The control-plane surface a purge needs.

use async_trait::async_trait;
use kube::api::DynamicObject;

use crate::error::ClusterError;
use crate::resource::{ResourceKind, ResourceRef};

pub mod kubernetes;

pub use kubernetes::KubeCluster;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Overrides the object's termination grace period. `Some(0)` deletes immediately.
    pub grace_period_seconds: Option<u32>,
}

impl DeleteOptions {
    pub fn with_grace_period(seconds: u32) -> Self {
        Self {
            grace_period_seconds: Some(seconds),
        }
    }
}

/// Uniform CRUD over every kind of object a purge touches.
///
/// Errors must be classifiable: absent objects surface as
/// [`ClusterError::NotFound`], write races as [`ClusterError::Conflict`].
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List objects of `kind`. `namespace` is ignored for cluster-scoped kinds.
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterError>;

    async fn get(&self, resource: &ResourceRef) -> Result<DynamicObject, ClusterError>;

    /// Write `object` back in place of the live object.
    async fn replace(
        &self,
        resource: &ResourceRef,
        object: &DynamicObject,
    ) -> Result<(), ClusterError>;

    async fn delete(
        &self,
        resource: &ResourceRef,
        options: &DeleteOptions,
    ) -> Result<(), ClusterError>;
}

/// `Ok` while the object exists, the classified error otherwise.
pub async fn exists(cluster: &dyn ClusterApi, resource: &ResourceRef) -> Result<(), ClusterError> {
    cluster.get(resource).await.map(|_| ())
}
