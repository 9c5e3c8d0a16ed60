//! Identifiers for the objects a purge deletes.

use std::fmt;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinitionSpec;
use kube::ResourceExt;
use kube::api::DynamicObject;

use crate::error::PurgeError;

/// One served version of a custom resource type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CustomKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl CustomKind {
    /// Name of the custom resource definition that declares this kind.
    pub fn schema_name(&self) -> String {
        format!("{}.{}", self.plural, self.group)
    }
}

impl fmt::Display for CustomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.version, self.plural)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Namespace,
    Pod,
    Secret,
    CustomResourceDefinition,
    Custom(CustomKind),
}

impl ResourceKind {
    pub fn is_namespaced(&self) -> bool {
        match self {
            ResourceKind::Pod | ResourceKind::Secret => true,
            ResourceKind::Namespace | ResourceKind::CustomResourceDefinition => false,
            ResourceKind::Custom(kind) => kind.namespaced,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Namespace => write!(f, "namespace"),
            ResourceKind::Pod => write!(f, "pod"),
            ResourceKind::Secret => write!(f, "secret"),
            ResourceKind::CustomResourceDefinition => write!(f, "customresourcedefinition"),
            ResourceKind::Custom(kind) => kind.fmt(f),
        }
    }
}

/// Identifies exactly one deletable object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    kind: ResourceKind,
    namespace: Option<String>,
    name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, namespace: Option<&str>, name: impl Into<String>) -> Self {
        // cluster-scoped kinds never carry a namespace
        let namespace = if kind.is_namespaced() {
            namespace.map(str::to_string)
        } else {
            None
        };
        Self {
            kind,
            namespace,
            name: name.into(),
        }
    }

    pub fn namespace(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Namespace, None, name)
    }

    pub fn pod(namespace: &str, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Pod, Some(namespace), name)
    }

    pub fn secret(namespace: &str, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Secret, Some(namespace), name)
    }

    pub fn schema(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::CustomResourceDefinition, None, name)
    }

    pub fn custom(kind: CustomKind, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Custom(kind), namespace, name)
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn namespace_name(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{} {}/{}", self.kind, namespace, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A decoded custom resource definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaDescriptor {
    pub name: String,
    pub group: String,
    pub kind: String,
    pub plural: String,
    pub versions: Vec<String>,
    pub namespaced: bool,
}

impl SchemaDescriptor {
    pub fn from_object(object: &DynamicObject) -> Result<Self, PurgeError> {
        let name = object.name_any();
        let spec = object
            .data
            .get("spec")
            .cloned()
            .ok_or_else(|| PurgeError::InvalidSchema {
                name: name.clone(),
                reason: "missing spec".to_string(),
            })?;
        let spec: CustomResourceDefinitionSpec =
            serde_json::from_value(spec).map_err(|e| PurgeError::InvalidSchema {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name,
            group: spec.group,
            kind: spec.names.kind,
            plural: spec.names.plural,
            versions: spec.versions.into_iter().map(|v| v.name).collect(),
            namespaced: spec.scope != "Cluster",
        })
    }

    /// One kind per declared version, all sharing group and plural.
    pub fn kinds(&self) -> Vec<CustomKind> {
        self.versions
            .iter()
            .map(|version| CustomKind {
                group: self.group.clone(),
                version: version.clone(),
                kind: self.kind.clone(),
                plural: self.plural.clone(),
                namespaced: self.namespaced,
            })
            .collect()
    }

    pub fn schema_ref(&self) -> ResourceRef {
        ResourceRef::schema(self.name.clone())
    }
}
