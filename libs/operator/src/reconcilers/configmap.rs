//! ConfigMap reconciler: `get`; if present, `update`. If
//! `NotFound` (even mid-update), `create`. Any terminal error emits
//! `ReconcileFailed`.
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Client;

use super::meta_name_namespace;
use crate::error::Result;
use crate::events::ChiEventRecorder;
use crate::kube_adapter::KubeApi;
use crate::registry::{ObjectKind, Registries};

pub async fn reconcile(
    client: Client,
    desired: &ConfigMap,
    registries: &Registries,
    events: &ChiEventRecorder,
) -> Result<ConfigMap> {
    let (name, namespace) = meta_name_namespace(&desired.metadata)?;
    let api: KubeApi<ConfigMap> = KubeApi::namespaced(client, &namespace);

    let result = match api.get(&name).await? {
        Some(_) => match api.apply(&name, desired).await {
            Ok(cm) => Ok(cm),
            Err(e) if e.is_not_found() => api.create(desired).await,
            Err(e) => Err(e),
        },
        None => api.create(desired).await,
    };

    match result {
        Ok(cm) => {
            registries
                .reconciled
                .register(ObjectKind::ConfigMap, &namespace, &name, cm.metadata.resource_version.clone());
            Ok(cm)
        }
        Err(e) => {
            registries.failed.register(ObjectKind::ConfigMap, &namespace, &name, None);
            events
                .reconcile_failed(format!("config map {namespace}/{name}: {e}"))
                .await;
            Err(e)
        }
    }
}
