//! [`ClusterApi`] backed by a live API server through `kube`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::config::KubeConfig;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use super::{ClusterApi, DeleteOptions};
use crate::error::{Classify, ClusterError, ErrorClass};
use crate::resource::{ResourceKind, ResourceRef};

impl Classify for kube::Error {
    fn class(&self) -> ErrorClass {
        match self {
            kube::Error::Api(response) if response.code == 404 => ErrorClass::NotFound,
            kube::Error::Api(response) if response.code == 409 => ErrorClass::Conflict,
            _ => ErrorClass::Other,
        }
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match (err.class(), &err) {
            (ErrorClass::NotFound, kube::Error::Api(response)) => {
                ClusterError::NotFound(response.message.clone())
            }
            (ErrorClass::Conflict, kube::Error::Api(response)) => {
                ClusterError::Conflict(response.message.clone())
            }
            _ => ClusterError::Other(Box::new(err)),
        }
    }
}

/// Where the client ended up pointing, for the confirmation prompt.
#[derive(Debug, Clone)]
pub struct ClusterTarget {
    pub context: Option<String>,
    pub cluster_url: String,
}

/// Build a client from an explicit kubeconfig/context, or infer one from the environment.
pub async fn connect(config: &KubeConfig) -> Result<(Client, ClusterTarget)> {
    let (client_config, context) = match (&config.kubeconfig, &config.context) {
        (None, None) => {
            let context = Kubeconfig::read().ok().and_then(|kc| kc.current_context);
            let client_config = Config::infer()
                .await
                .context("Failed to infer cluster configuration")?;
            (client_config, context)
        }
        (path, context) => {
            let kubeconfig = match path {
                Some(path) => Kubeconfig::read_from(path)
                    .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?,
                None => Kubeconfig::read().context("Failed to read kubeconfig")?,
            };
            let current = context.clone().or_else(|| kubeconfig.current_context.clone());
            let options = KubeConfigOptions {
                context: context.clone(),
                ..KubeConfigOptions::default()
            };
            let client_config = Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .context("Failed to load kubeconfig")?;
            (client_config, current)
        }
    };

    let target = ClusterTarget {
        context,
        cluster_url: client_config.cluster_url.to_string(),
    };
    let client = Client::try_from(client_config).context("Failed to create cluster client")?;
    Ok((client, target))
}

pub fn api_resource(kind: &ResourceKind) -> ApiResource {
    match kind {
        ResourceKind::Namespace => ApiResource::erase::<Namespace>(&()),
        ResourceKind::Pod => ApiResource::erase::<Pod>(&()),
        ResourceKind::Secret => ApiResource::erase::<Secret>(&()),
        ResourceKind::CustomResourceDefinition => {
            ApiResource::erase::<CustomResourceDefinition>(&())
        }
        ResourceKind::Custom(custom) => ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(&custom.group, &custom.version, &custom.kind),
            &custom.plural,
        ),
    }
}

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: &ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = api_resource(kind);
        match namespace {
            Some(namespace) if kind.is_namespaced() => {
                Api::namespaced_with(self.client.clone(), namespace, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn api_for(&self, resource: &ResourceRef) -> Api<DynamicObject> {
        self.api(resource.kind(), resource.namespace_name())
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let list = self.api(kind, namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn get(&self, resource: &ResourceRef) -> Result<DynamicObject, ClusterError> {
        Ok(self.api_for(resource).get(resource.name()).await?)
    }

    async fn replace(
        &self,
        resource: &ResourceRef,
        object: &DynamicObject,
    ) -> Result<(), ClusterError> {
        self.api_for(resource)
            .replace(resource.name(), &PostParams::default(), object)
            .await?;
        Ok(())
    }

    async fn delete(
        &self,
        resource: &ResourceRef,
        options: &DeleteOptions,
    ) -> Result<(), ClusterError> {
        let params = DeleteParams {
            grace_period_seconds: options.grace_period_seconds,
            ..DeleteParams::default()
        };
        self.api_for(resource)
            .delete(resource.name(), &params)
            .await?;
        Ok(())
    }
}
