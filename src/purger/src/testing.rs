//! In-memory stand-ins for the control plane and the package manager.
//!
//! [`InMemoryCluster`] keeps just enough API-server behavior for the purge
//! protocol: finalizers block removal, namespace deletion cascades to the
//! objects inside it, and every call can be counted or made to fail.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::json;

use crate::cancel::CancelToken;
use crate::cluster::kubernetes::api_resource;
use crate::cluster::{ClusterApi, DeleteOptions};
use crate::error::ClusterError;
use crate::releases::ReleaseManager;
use crate::resource::{ResourceKind, ResourceRef, SchemaDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Get,
    Replace,
    Delete,
}

#[derive(Debug, Clone)]
enum Failure {
    NotFound,
    Conflict,
    Other(String),
}

#[derive(Debug)]
struct Stored {
    object: DynamicObject,
    deleting: bool,
    /// Ignores finalizer removal, like a controller that keeps re-adding its finalizer.
    sticky: bool,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<ResourceRef, Stored>,
    failures: HashMap<(Op, String), Failure>,
    calls: HashMap<(Op, String), usize>,
    last_delete: HashMap<String, DeleteOptions>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<State>>,
}

/// A custom resource definition object as the API server would return it.
pub fn crd_object(
    name: &str,
    group: &str,
    kind: &str,
    plural: &str,
    versions: &[&str],
) -> DynamicObject {
    let mut object = DynamicObject::new(name, &api_resource(&ResourceKind::CustomResourceDefinition));
    let versions: Vec<_> = versions
        .iter()
        .map(|v| json!({ "name": v, "served": true, "storage": true }))
        .collect();
    object.data = json!({
        "spec": {
            "group": group,
            "names": { "kind": kind, "plural": plural },
            "scope": "Namespaced",
            "versions": versions,
        }
    });
    object
}

/// Like [`crd_object`], for a kind whose instances are not namespaced.
pub fn cluster_scoped_crd_object(
    name: &str,
    group: &str,
    kind: &str,
    plural: &str,
    versions: &[&str],
) -> DynamicObject {
    let mut object = crd_object(name, group, kind, plural, versions);
    object.data["spec"]["scope"] = json!("Cluster");
    object
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("in-memory cluster lock poisoned")
    }

    pub fn insert(&self, resource: ResourceRef, finalizers: &[&str], sticky: bool) {
        let mut object = DynamicObject::new(resource.name(), &api_resource(resource.kind()));
        if let Some(namespace) = resource.namespace_name() {
            object = object.within(namespace);
        }
        if !finalizers.is_empty() {
            object.metadata.finalizers = Some(finalizers.iter().map(|f| f.to_string()).collect());
        }
        self.insert_object(resource, object, sticky);
    }

    fn insert_object(&self, resource: ResourceRef, object: DynamicObject, sticky: bool) {
        self.state().objects.insert(
            resource,
            Stored {
                object,
                deleting: false,
                sticky,
            },
        );
    }

    pub fn add_namespace(&self, name: &str) -> &Self {
        self.insert(ResourceRef::namespace(name), &[], false);
        self
    }

    pub fn add_pod(&self, namespace: &str, name: &str) -> &Self {
        self.insert(ResourceRef::pod(namespace, name), &[], false);
        self
    }

    pub fn add_secret(&self, namespace: &str, name: &str) -> &Self {
        self.insert(ResourceRef::secret(namespace, name), &[], false);
        self
    }

    pub fn add_schema(&self, object: DynamicObject) -> SchemaDescriptor {
        let schema = SchemaDescriptor::from_object(&object).expect("valid test schema");
        self.insert_object(schema.schema_ref(), object, false);
        schema
    }

    /// Store a definition object without decoding it.
    pub fn add_raw_schema(&self, object: DynamicObject) {
        let resource = ResourceRef::schema(object.metadata.name.clone().unwrap_or_default());
        self.insert_object(resource, object, false);
    }

    pub fn contains(&self, resource: &ResourceRef) -> bool {
        self.state().objects.contains_key(resource)
    }

    /// Names of the stored objects of `kind`, sorted.
    pub fn names(&self, kind: &ResourceKind) -> Vec<String> {
        let state = self.state();
        let names: BTreeSet<_> = state
            .objects
            .keys()
            .filter(|r| r.kind() == kind)
            .map(|r| r.name().to_string())
            .collect();
        names.into_iter().collect()
    }

    pub fn fail_with_not_found(&self, op: Op, name: &str) {
        self.state()
            .failures
            .insert((op, name.to_string()), Failure::NotFound);
    }

    pub fn fail_with_conflict(&self, op: Op, name: &str) {
        self.state()
            .failures
            .insert((op, name.to_string()), Failure::Conflict);
    }

    /// Make `op` on the object `name` (or on the kind `name` for lists) fail.
    pub fn fail(&self, op: Op, name: &str, message: &str) {
        self.state()
            .failures
            .insert((op, name.to_string()), Failure::Other(message.to_string()));
    }

    pub fn calls(&self, op: Op, name: &str) -> usize {
        self.state()
            .calls
            .get(&(op, name.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn last_delete_options(&self, name: &str) -> Option<DeleteOptions> {
        self.state().last_delete.get(name).copied()
    }

    fn enter(&self, op: Op, name: &str) -> Result<std::sync::MutexGuard<'_, State>, ClusterError> {
        let mut state = self.state();
        *state.calls.entry((op, name.to_string())).or_default() += 1;
        match state.failures.get(&(op, name.to_string())) {
            Some(Failure::NotFound) => Err(ClusterError::NotFound(name.to_string())),
            Some(Failure::Conflict) => Err(ClusterError::Conflict(name.to_string())),
            Some(Failure::Other(message)) => Err(ClusterError::other(message.clone())),
            None => Ok(state),
        }
    }
}

fn has_finalizers(object: &DynamicObject) -> bool {
    object
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| !f.is_empty())
}

impl State {
    fn is_served(&self, kind: &ResourceKind) -> bool {
        match kind {
            ResourceKind::Custom(custom) => self
                .objects
                .contains_key(&ResourceRef::schema(custom.schema_name())),
            _ => true,
        }
    }

    /// Finish deletions whose finalizers are gone and cascade terminating
    /// namespaces and definitions.
    fn settle(&mut self) {
        loop {
            let dropped_schemas: Vec<String> = self
                .objects
                .iter()
                .filter(|(r, s)| *r.kind() == ResourceKind::CustomResourceDefinition && s.deleting)
                .map(|(r, _)| r.name().to_string())
                .collect();
            for (resource, stored) in self.objects.iter_mut() {
                if let ResourceKind::Custom(kind) = resource.kind() {
                    if dropped_schemas.contains(&kind.schema_name()) {
                        stored.deleting = true;
                    }
                }
            }

            let terminating: Vec<String> = self
                .objects
                .iter()
                .filter(|(r, s)| *r.kind() == ResourceKind::Namespace && s.deleting)
                .map(|(r, _)| r.name().to_string())
                .collect();
            for namespace in &terminating {
                for (resource, stored) in self.objects.iter_mut() {
                    if resource.namespace_name() == Some(namespace.as_str()) {
                        stored.deleting = true;
                    }
                }
            }

            let done: Vec<ResourceRef> = self
                .objects
                .iter()
                .filter(|(resource, stored)| {
                    if !stored.deleting || has_finalizers(&stored.object) {
                        return false;
                    }
                    match resource.kind() {
                        ResourceKind::Namespace => !self
                            .objects
                            .keys()
                            .any(|r| r.namespace_name() == Some(resource.name())),
                        ResourceKind::CustomResourceDefinition => {
                            !self.objects.keys().any(|r| match r.kind() {
                                ResourceKind::Custom(kind) => kind.schema_name() == resource.name(),
                                _ => false,
                            })
                        }
                        _ => true,
                    }
                })
                .map(|(resource, _)| resource.clone())
                .collect();

            if done.is_empty() {
                return;
            }
            for resource in done {
                self.objects.remove(&resource);
            }
        }
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let mut state = self.enter(Op::List, &kind.to_string())?;
        state.settle();
        if !state.is_served(kind) {
            return Err(ClusterError::NotFound(kind.to_string()));
        }
        let namespace = if kind.is_namespaced() { namespace } else { None };

        let matching: BTreeMap<String, DynamicObject> = state
            .objects
            .iter()
            .filter(|(r, _)| r.kind() == kind)
            .filter(|(r, _)| namespace.is_none() || r.namespace_name() == namespace)
            .map(|(r, s)| (r.to_string(), s.object.clone()))
            .collect();
        Ok(matching.into_values().collect())
    }

    async fn get(&self, resource: &ResourceRef) -> Result<DynamicObject, ClusterError> {
        let mut state = self.enter(Op::Get, resource.name())?;
        state.settle();
        state
            .objects
            .get(resource)
            .map(|s| s.object.clone())
            .ok_or_else(|| ClusterError::NotFound(resource.to_string()))
    }

    async fn replace(
        &self,
        resource: &ResourceRef,
        object: &DynamicObject,
    ) -> Result<(), ClusterError> {
        let mut state = self.enter(Op::Replace, resource.name())?;
        let stored = state
            .objects
            .get_mut(resource)
            .ok_or_else(|| ClusterError::NotFound(resource.to_string()))?;
        if !stored.sticky {
            stored.object = object.clone();
        }
        state.settle();
        Ok(())
    }

    async fn delete(
        &self,
        resource: &ResourceRef,
        options: &DeleteOptions,
    ) -> Result<(), ClusterError> {
        let mut state = self.enter(Op::Delete, resource.name())?;
        state
            .last_delete
            .insert(resource.name().to_string(), *options);
        let stored = state
            .objects
            .get_mut(resource)
            .ok_or_else(|| ClusterError::NotFound(resource.to_string()))?;
        stored.deleting = true;
        state.settle();
        Ok(())
    }
}

/// Release manager with a fixed release list and an optionally failing uninstall.
#[derive(Debug, Clone, Default)]
pub struct StaticReleases {
    inner: Arc<Mutex<StaticReleasesState>>,
}

#[derive(Debug, Default)]
struct StaticReleasesState {
    releases: BTreeMap<String, Vec<String>>,
    failing: BTreeSet<String>,
    uninstalled: Vec<(String, String)>,
}

impl StaticReleases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_release(self, namespace: &str, release: &str) -> Self {
        self.lock()
            .releases
            .entry(namespace.to_string())
            .or_default()
            .push(release.to_string());
        self
    }

    pub fn failing_uninstall(self, release: &str) -> Self {
        self.lock().failing.insert(release.to_string());
        self
    }

    /// `(namespace, release)` pairs that were uninstalled successfully.
    pub fn uninstalled(&self) -> Vec<(String, String)> {
        self.lock().uninstalled.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StaticReleasesState> {
        self.inner.lock().expect("release state lock poisoned")
    }
}

#[async_trait]
impl ReleaseManager for StaticReleases {
    async fn list_releases(&self, namespace: &str) -> Result<Vec<String>, ClusterError> {
        Ok(self
            .lock()
            .releases
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn uninstall(
        &self,
        namespace: &str,
        release: &str,
        _cancel: &CancelToken,
    ) -> Result<(), ClusterError> {
        let mut state = self.lock();
        if state.failing.contains(release) {
            return Err(ClusterError::other(format!(
                "uninstall of {release} failed: hook timed out"
            )));
        }
        if let Some(releases) = state.releases.get_mut(namespace) {
            releases.retain(|r| r != release);
        }
        state
            .uninstalled
            .push((namespace.to_string(), release.to_string()));
        Ok(())
    }
}
