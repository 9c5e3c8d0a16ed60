use std::sync::Arc;

use kube::ResourceExt;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::cluster::{ClusterApi, DeleteOptions};
use crate::deleter::EscalatingDeleter;
use crate::error::PurgeError;
use crate::fanout::FanOut;
use crate::namespaces::NamespaceSet;
use crate::resource::{CustomKind, ResourceKind, ResourceRef, SchemaDescriptor};

/// Delete every instance of every custom resource type whose definition name
/// ends with `suffix`, then the definitions themselves.
pub async fn teardown_custom_resources(
    cluster: Arc<dyn ClusterApi>,
    deleter: EscalatingDeleter,
    suffix: &str,
    namespaces: &NamespaceSet,
    cancel: &CancelToken,
    limit: Option<usize>,
) -> Result<(), PurgeError> {
    let objects = cancel
        .guard(cluster.list(&ResourceKind::CustomResourceDefinition, None))
        .await?
        .map_err(PurgeError::cluster("failed to list custom resource definitions"))?;

    let mut schemas = Vec::new();
    for object in &objects {
        let name = object.name_any();
        if !name.ends_with(suffix) {
            continue;
        }
        info!(name, "Found custom resource definition");
        schemas.push(SchemaDescriptor::from_object(object)?);
    }

    let mut fanout = FanOut::with_limit(cancel, limit);
    for kind in schemas.iter().flat_map(SchemaDescriptor::kinds) {
        let cluster = cluster.clone();
        let deleter = deleter.clone();
        let namespaces = namespaces.clone();
        fanout.spawn(move |cancel| async move {
            purge_kind(cluster.as_ref(), &deleter, &kind, &namespaces, &cancel, limit)
                .await
                .map_err(|e| e.within(format!("error purging {kind}")))
        });
    }
    fanout.wait().await
}

async fn purge_kind(
    cluster: &dyn ClusterApi,
    deleter: &EscalatingDeleter,
    kind: &CustomKind,
    namespaces: &NamespaceSet,
    cancel: &CancelToken,
    limit: Option<usize>,
) -> Result<(), PurgeError> {
    let resource_kind = ResourceKind::Custom(kind.clone());
    let scopes: Vec<Option<&str>> = if kind.namespaced {
        namespaces.iter().map(Some).collect()
    } else {
        vec![None]
    };

    let mut fanout = FanOut::with_limit(cancel, limit);
    for namespace in scopes {
        let items = match cancel
            .guard(cluster.list(&resource_kind, namespace))
            .await?
        {
            Ok(items) => items,
            // the kind is not served there
            Err(err) if err.is_not_found() => continue,
            Err(source) => {
                return Err(PurgeError::Cluster {
                    context: format!(
                        "error listing {kind} in namespace {}",
                        namespace.unwrap_or("(all)")
                    ),
                    source,
                });
            }
        };

        for item in items {
            let resource = ResourceRef::custom(kind.clone(), namespace, item.name_any());
            let deleter = deleter.clone();
            fanout.spawn(move |cancel| async move {
                deleter.delete_and_confirm(&cancel, &resource).await
            });
        }
    }

    let schema_name = kind.schema_name();
    fanout
        .wait()
        .await
        .map_err(|e| e.within(format!("error purging custom resource definition {schema_name}")))?;

    info!(name = %schema_name, "Deleting custom resource definition");
    let schema = ResourceRef::schema(schema_name.as_str());
    match cancel
        .guard(cluster.delete(&schema, &DeleteOptions::default()))
        .await?
    {
        Ok(()) => Ok(()),
        Err(err) if err.is_not_found() => Ok(()),
        Err(source) => {
            warn!(name = %schema_name, error = %source, "Failed to delete custom resource definition");
            Err(PurgeError::Cluster {
                context: format!("error deleting custom resource definition {schema_name}"),
                source,
            })
        }
    }
}
