//! Ready Label/Annotation Manager: stamps a `Ready` label on host pods and
//! a `Ready` annotation on host services, reflecting cluster membership
//! state. Used by the include/exclude protocol in `host`.
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::Client;
use serde_json::json;

use crate::error::Result;
use crate::kube_adapter::KubeApi;
use crate::model::Host;

pub const READY_LABEL: &str = "clickhouse.altinity.com/ready";
pub const READY_ANNOTATION: &str = "clickhouse.altinity.com/ready";

fn pod_name(host: &Host) -> String {
    format!("chi-{}-{}", host.chi_name, host.fq_name())
}

fn service_name(host: &Host) -> String {
    format!("chi-{}-{}", host.chi_name, host.fq_name())
}

/// On `NotFound` during *delete* paths, absence already satisfies the goal,
/// so this collapses a 404 to `Ok(())`.
fn ok_if_not_found(res: Result<Pod>) -> Result<()> {
    match res {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

pub async fn append_label_ready_on_pod(client: Client, host: &Host) -> Result<()> {
    let api: KubeApi<Pod> = KubeApi::namespaced(client, &host.namespace);
    let name = pod_name(host);
    match api.get(&name).await? {
        None => Ok(()),
        Some(pod) => {
            let already_ready = pod
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(READY_LABEL))
                .is_some();
            if already_ready {
                return Ok(());
            }
            api.merge_patch(
                &name,
                &json!({ "metadata": { "labels": { READY_LABEL: "true" } } }),
            )
            .await?;
            Ok(())
        }
    }
}

pub async fn delete_label_ready_on_pod(client: Client, host: &Host) -> Result<()> {
    let api: KubeApi<Pod> = KubeApi::namespaced(client, &host.namespace);
    let name = pod_name(host);
    ok_if_not_found(
        match api.get(&name).await? {
            None => return Ok(()),
            Some(pod) => {
                let absent = pod
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(READY_LABEL))
                    .is_none();
                if absent {
                    return Ok(());
                }
                api.merge_patch(&name, &json!({ "metadata": { "labels": { READY_LABEL: null } } }))
                    .await
            }
        },
    )
}

pub async fn append_annotation_ready_on_service(client: Client, host: &Host) -> Result<()> {
    let api: KubeApi<Service> = KubeApi::namespaced(client, &host.namespace);
    let name = service_name(host);
    if let Some(svc) = api.get(&name).await? {
        let already_ready = svc
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(READY_ANNOTATION))
            .is_some();
        if !already_ready {
            api.merge_patch(
                &name,
                &json!({ "metadata": { "annotations": { READY_ANNOTATION: "true" } } }),
            )
            .await?;
        }
    }
    Ok(())
}

pub async fn delete_annotation_ready_on_service(client: Client, host: &Host) -> Result<()> {
    let api: KubeApi<Service> = KubeApi::namespaced(client, &host.namespace);
    let name = service_name(host);
    match api.get(&name).await {
        Ok(Some(svc)) => {
            let absent = svc
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(READY_ANNOTATION))
                .is_none();
            if absent {
                return Ok(());
            }
            api.merge_patch(
                &name,
                &json!({ "metadata": { "annotations": { READY_ANNOTATION: null } } }),
            )
            .await?;
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}
