//! Top CHI Reconciler: entry point, generation gating, normalization
//! boundary, action plan, the main recursion, and post-processing
//! (clean / drop-replicas / completion marking).
use std::sync::Arc;

use kube::api::Patch;
use kube::{Client, Resource, ResourceExt};

use crate::ancestor::AncestorStore;
use crate::cluster;
use crate::controller::Context;
use crate::crd::chi::{ClickHouseInstallation, ClickHouseInstallationStatus};
use crate::error::{Error, Result};
use crate::events::ChiEventRecorder;
use crate::kube_adapter::KubeApi;
use crate::model::{Chi, ChiReconcileStatus};
use crate::normalize::normalize;
use crate::plan::ActionPlan;
use crate::registry::Registries;
use crate::shard;

/// Everything threaded unchanged through cluster/shard/host recursion,
/// bundled into one struct instead of growing every function's parameter
/// list each time a new collaborator is added.
pub struct ReconcileTask<'a> {
    pub raw: &'a ClickHouseInstallation,
    pub ctx: &'a Context,
    pub events: &'a ChiEventRecorder,
    pub registries: &'a Registries,
    pub full_fan_out: bool,
}

/// Entry point for a single CHI reconcile pass.
pub async fn reconcile_chi(chi: Arc<ClickHouseInstallation>, ctx: Arc<Context>) -> Result<()> {
    if ctx.cancel.is_cancelled() {
        return Ok(());
    }

    let namespace = chi.namespace().unwrap_or_default();
    let name = chi.name_any();

    let ancestor = ctx.ancestors.get(&namespace, &name);

    // Generation equality implies no structural change since the last
    // successfully reconciled pass: nothing to do.
    if let Some(ancestor) = &ancestor {
        if ancestor.meta().generation == chi.meta().generation {
            return Ok(());
        }
    }

    let old_tree = ancestor.as_deref().map(|a| normalize(a, None));
    let mut new_tree = normalize(&chi, ancestor.clone());

    let plan = ActionPlan::build(old_tree.as_ref(), &new_tree);
    if !plan.has_actions_to_do() {
        ctx.ancestors.set(&namespace, &name, chi.clone());
        return Ok(());
    }
    plan.apply(&mut new_tree);

    let events = ChiEventRecorder::new(ctx.client.clone(), &chi);
    events.reconcile_started(format!("reconciling {}/{}", namespace, name)).await;

    let registries = Registries::new();
    let task = ReconcileTask {
        raw: &chi,
        ctx: &ctx,
        events: &events,
        registries: &registries,
        full_fan_out: plan.add_only(),
    };

    new_tree.runtime.status.write().await.hosts_count = new_tree.host_count() as u32;

    let result = reconcile_main(&task, &new_tree).await;

    // Registry-driven cleanup runs regardless of whether the pass above
    // succeeded: it only deletes objects whose host the new topology
    // genuinely dropped, which is true whether or not some unrelated host
    // later failed.
    clean(&task, old_tree.as_ref(), &new_tree).await;

    match result {
        Ok(()) => {
            drop_replicas(&task, old_tree.as_ref(), &new_tree).await;
            persist_status(ctx.client.clone(), &chi, &*new_tree.runtime.status.read().await).await?;
            events.reconcile_completed(format!("{}/{} reconciled", namespace, name)).await;
            ctx.ancestors.set(&namespace, &name, chi.clone());
            Ok(())
        }
        Err(e) => {
            new_tree.runtime.status.write().await.error = Some(e.to_string());
            let _ = persist_status(ctx.client.clone(), &chi, &*new_tree.runtime.status.read().await).await;
            events.reconcile_failed(format!("{}/{}: {}", namespace, name, e)).await;
            Err(e)
        }
    }
}

/// Preliminary aux, clusters, shards, final aux, in fixed order,
/// short-circuiting on the first error or on cancellation.
async fn reconcile_main(task: &ReconcileTask<'_>, chi: &Chi) -> Result<()> {
    if task.ctx.cancel.is_cancelled() {
        return Ok(());
    }
    reconcile_chi_aux_objects_preliminary(task, chi).await;

    for cl in &chi.clusters {
        if task.ctx.cancel.is_cancelled() {
            return Ok(());
        }
        cluster::reconcile_cluster(task, chi, cl).await?;
    }

    if task.ctx.cancel.is_cancelled() {
        return Ok(());
    }
    shard::reconcile_shards_and_hosts(task, chi).await?;

    if task.ctx.cancel.is_cancelled() {
        return Ok(());
    }
    reconcile_chi_aux_objects_final(task, chi).await;

    Ok(())
}

/// Common/users config maps, upserted under the CHI's common-config lock.
/// Errors here are logged, not fatal.
async fn reconcile_chi_aux_objects_preliminary(task: &ReconcileTask<'_>, chi: &Chi) {
    let _guard = chi.runtime.common_config_lock.lock().await;
    use crate::factory::{DesiredObject, FactoryContext, ObjectKind};

    let fctx = FactoryContext {
        chi,
        cluster: None,
        host: None,
        include_runtime_options: false,
    };
    for kind in [ObjectKind::ConfigMapCommon, ObjectKind::ConfigMapUsers] {
        if let Some(DesiredObject::ConfigMap(cm)) = task.ctx.factory.build(kind, &fctx) {
            if let Err(e) =
                crate::reconcilers::configmap::reconcile(task.ctx.client.clone(), &cm, task.registries, task.events)
                    .await
            {
                tracing::warn!(error = %e, ?kind, "aux config map reconcile failed, continuing");
            }
        }
    }
}

/// Re-run of the common config map once hosts are up, so it can embed
/// information only known after the topology is realized.
async fn reconcile_chi_aux_objects_final(task: &ReconcileTask<'_>, chi: &Chi) {
    let _guard = chi.runtime.common_config_lock.lock().await;
    use crate::factory::{DesiredObject, FactoryContext, ObjectKind};

    let fctx = FactoryContext {
        chi,
        cluster: None,
        host: None,
        include_runtime_options: true,
    };
    if let Some(DesiredObject::ConfigMap(cm)) = task.ctx.factory.build(ObjectKind::ConfigMapCommon, &fctx) {
        if let Err(e) =
            crate::reconcilers::configmap::reconcile(task.ctx.client.clone(), &cm, task.registries, task.events).await
        {
            tracing::warn!(error = %e, "final common config map reconcile failed, continuing");
        }
    }
}

/// Objects belonging to a host the new topology dropped are candidates for
/// deletion; `Registries::stale` then confirms each candidate was not
/// itself reconciled this pass (e.g. by a concurrent rename landing on the
/// same name) before anything is actually deleted.
async fn clean(task: &ReconcileTask<'_>, old: Option<&Chi>, new: &Chi) {
    let Some(old) = old else { return };

    let mut candidates = Vec::new();
    for old_cluster in &old.clusters {
        for shard in &old_cluster.shards {
            for old_host in &shard.hosts {
                let still_present = new.hosts().any(|h| {
                    h.cluster_name == old_host.cluster_name
                        && h.shard_index == old_host.shard_index
                        && h.replica_index == old_host.replica_index
                });
                if !still_present {
                    candidates.extend(host_object_refs(task, old, old_cluster, old_host));
                }
            }
        }
    }

    for stale in task.registries.reconciled.stale(&candidates) {
        delete_object_ref(task, &stale).await;
    }
}

/// The registry refs a host's per-host objects would carry, had this pass
/// reconciled them.
fn host_object_refs(
    task: &ReconcileTask<'_>,
    old: &Chi,
    cluster: &crate::model::Cluster,
    host: &crate::model::Host,
) -> Vec<crate::registry::ObjectRef> {
    use crate::factory::{FactoryContext, ObjectKind as FactoryKind};
    use crate::registry::{ObjectKind as RegKind, ObjectRef};

    let fctx = FactoryContext {
        chi: old,
        cluster: Some(cluster),
        host: Some(host),
        include_runtime_options: false,
    };

    [
        (FactoryKind::ConfigMapHost, RegKind::ConfigMap),
        (FactoryKind::ServiceHost, RegKind::Service),
        (FactoryKind::StatefulSetHost, RegKind::StatefulSet),
    ]
    .into_iter()
    .filter_map(|(factory_kind, reg_kind)| {
        let desired = task.ctx.factory.build(factory_kind, &fctx)?;
        let name = desired_name(&desired)?;
        Some(ObjectRef {
            kind: reg_kind,
            namespace: old.namespace.clone(),
            name,
        })
    })
    .collect()
}

async fn delete_object_ref(task: &ReconcileTask<'_>, obj_ref: &crate::registry::ObjectRef) {
    use crate::registry::ObjectKind as RegKind;
    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::api::core::v1::{ConfigMap, Service};

    let result = match obj_ref.kind {
        RegKind::ConfigMap => {
            KubeApi::<ConfigMap>::namespaced(task.ctx.client.clone(), &obj_ref.namespace)
                .delete_if_exists(&obj_ref.name)
                .await
        }
        RegKind::Service => {
            KubeApi::<Service>::namespaced(task.ctx.client.clone(), &obj_ref.namespace)
                .delete_if_exists(&obj_ref.name)
                .await
        }
        RegKind::StatefulSet => {
            KubeApi::<StatefulSet>::namespaced(task.ctx.client.clone(), &obj_ref.namespace)
                .delete_if_exists(&obj_ref.name)
                .await
        }
        RegKind::Secret | RegKind::Pvc | RegKind::Pdb => Ok(()),
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, kind = ?obj_ref.kind, name = %obj_ref.name, "failed to delete stale object");
    }
}

fn desired_name(desired: &crate::factory::DesiredObject) -> Option<String> {
    use crate::factory::DesiredObject;
    match desired {
        DesiredObject::ConfigMap(o) => o.metadata.name.clone(),
        DesiredObject::Service(o) => o.metadata.name.clone(),
        DesiredObject::Secret(o) => o.metadata.name.clone(),
        DesiredObject::Pdb(o) => o.metadata.name.clone(),
        DesiredObject::StatefulSet(o) => o.metadata.name.clone(),
    }
}

/// Hosts removed by the new topology have their replicas dropped from
/// ClickHouse's internal replication state. The schemer contract does not
/// name this operation explicitly; best-effort via `migrate_tables` with
/// `drop_replica: true` against a surviving host of the same shard, when
/// one remains.
async fn drop_replicas(task: &ReconcileTask<'_>, old: Option<&Chi>, new: &Chi) {
    let Some(old) = old else { return };
    for old_cluster in &old.clusters {
        for shard in &old_cluster.shards {
            for old_host in &shard.hosts {
                let still_present = new.hosts().any(|h| {
                    h.cluster_name == old_host.cluster_name
                        && h.shard_index == old_host.shard_index
                        && h.replica_index == old_host.replica_index
                });
                if still_present {
                    continue;
                }
                if let Some(surviving) = new
                    .hosts()
                    .find(|h| h.cluster_name == old_host.cluster_name && h.shard_index == old_host.shard_index)
                {
                    let opts = crate::schemer::MigrateTableOpts {
                        force_migrate: false,
                        drop_replica: true,
                    };
                    if let Err(e) = task.ctx.schemer.migrate_tables(surviving, opts).await {
                        tracing::warn!(error = %e, host = %old_host.fq_name(), "drop_replicas best-effort call failed");
                    }
                }
            }
        }
    }
}

/// Partial status patch: merges the reconcile-pass status fields without
/// clobbering ancillary fields another controller may be writing.
pub async fn persist_status(client: Client, raw: &ClickHouseInstallation, status: &ChiReconcileStatus) -> Result<()> {
    let namespace = raw.namespace().unwrap_or_default();
    let name = raw.name_any();
    let api: kube::Api<ClickHouseInstallation> = kube::Api::namespaced(client, &namespace);

    let patch = ClickHouseInstallationStatus {
        hosts_count: status.hosts_count,
        hosts_completed_count: status.hosts_completed_count,
        action: status.action.clone(),
        actions: status.actions.clone(),
        error: status.error.clone(),
        errors: status.errors.clone(),
    };

    api.patch_status(
        &name,
        &kube::api::PatchParams::default(),
        &Patch::Merge(serde_json::json!({ "status": patch })),
    )
    .await
    .map_err(Error::from)?;
    Ok(())
}

pub fn ancestors_of(store: &AncestorStore, namespace: &str, name: &str) -> Option<Arc<ClickHouseInstallation>> {
    store.get(namespace, name)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crd::chi::ClickHouseInstallationSpec;

    fn test_chi(namespace: &str, name: &str) -> ClickHouseInstallation {
        let mut chi = ClickHouseInstallation::new(name, ClickHouseInstallationSpec::default());
        chi.meta_mut().namespace = Some(namespace.to_owned());
        chi
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits_before_any_api_call() {
        let (ctx, _handle) = Context::test();
        ctx.cancel.cancel();

        let chi = Arc::new(test_chi("default", "cancelled"));
        // No request is ever scripted against `_handle`; if `reconcile_chi`
        // attempted any API call this would hang instead of returning.
        let result = reconcile_chi(chi, ctx).await;
        assert!(result.is_ok());
    }
}
