//! PVC / storage reconciler. Unlike the other per-object reconcilers this
//! one lists by label rather than upserting a single named object from the
//! factory — volume claims are immutable in the ways that matter (storage
//! class, size shrink), so reconciling one is mostly about detecting
//! mismatch, not mutating it.
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{ListParams, ObjectMeta, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;

use crate::error::Result;
use crate::model::Host;

fn host_label_selector(host: &Host) -> String {
    format!("clickhouse.altinity.com/replica={}", host.fq_name())
}

async fn list_host_pvcs(client: Client, host: &Host) -> Result<Vec<PersistentVolumeClaim>> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client, &host.namespace);
    let list = api
        .list(&ListParams::default().labels(&host_label_selector(host)))
        .await?;
    Ok(list.items)
}

/// Number of PVCs currently labeled for this host; feeds both `setHasData`
/// and the data-loss dry check so the host state machine lists once.
pub async fn count_host_pvcs(client: Client, host: &Host) -> Result<usize> {
    Ok(list_host_pvcs(client, host).await?.len())
}

/// True iff any PVC for this host already exists.
pub async fn set_has_data(client: Client, host: &Host) -> Result<bool> {
    Ok(count_host_pvcs(client, host).await? > 0)
}

/// Pure comparison, no I/O, so the host state machine and its tests can
/// drive it directly.
pub fn dry_check_data_loss(existing_pvc_count: usize, expected_volume_claim_templates: usize) -> bool {
    existing_pvc_count > 0 && existing_pvc_count < expected_volume_claim_templates
}

/// Polish newly created volumes by making sure the host's replica label is
/// present. Best-effort: errors are logged, never propagated.
pub async fn reconcile_host_pvcs(client: Client, host: &Host) {
    let pvcs = match list_host_pvcs(client.clone(), host).await {
        Ok(pvcs) => pvcs,
        Err(e) => {
            tracing::warn!(error = %e, host = %host.fq_name(), "failed to list pvcs");
            return;
        }
    };

    let api: Api<PersistentVolumeClaim> = Api::namespaced(client, &host.namespace);
    for pvc in pvcs {
        let Some(name) = pvc.metadata.name.clone() else {
            continue;
        };
        if has_replica_label(&pvc.metadata, host) {
            continue;
        }
        let patch = json!({ "metadata": { "labels": { "clickhouse.altinity.com/replica": host.fq_name() } } });
        if let Err(e) = api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch)).await {
            tracing::warn!(error = %e, %name, "failed to relabel pvc");
        }
    }
}

fn has_replica_label(meta: &ObjectMeta, host: &Host) -> bool {
    meta.labels
        .as_ref()
        .and_then(|l| l.get("clickhouse.altinity.com/replica"))
        .is_some_and(|v| v == &host.fq_name())
}
