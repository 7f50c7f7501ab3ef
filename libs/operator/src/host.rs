//! Host Reconciler: the innermost state machine, one replica at a time.
//! Any step not documented below as best-effort aborts the host on error
//! and bumps `HostReconcilesErrors`.
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::chi::{self, ReconcileTask};
use crate::error::{Error, Result};
use crate::events::ChiEventRecorder;
use crate::factory::{DesiredObject, FactoryContext, ObjectKind};
use crate::kube_adapter::KubeApi;
use crate::model::{Chi, Cluster, Host, HostLifecycle, HostReconcileAttributes};
use crate::poller::{poll, PollOptions, PollOutcome};
use crate::reconcilers::{configmap, pvc, ready, service, statefulset};
use crate::schemer::{MigrateTableOpts, VersionProbeOpts};

pub async fn reconcile_host(task: &ReconcileTask<'_>, chi: &Chi, cluster: &Cluster, host: &Host) -> Result<()> {
    if task.ctx.cancel.is_cancelled() {
        return Ok(());
    }

    let start = Instant::now();
    host.runtime.write().await.lifecycle = HostLifecycle::Reconciling;

    if host.is_first_in_chi() {
        reconcile_chi_service_preliminary(task, chi).await;
    }

    let result = reconcile_host_inner(task, chi, cluster, host).await;

    if host.is_first_in_chi() {
        reconcile_chi_service_final(task, chi).await;
    }

    match &result {
        Ok(()) => {
            host.runtime.write().await.lifecycle = HostLifecycle::Completed;
        }
        Err(e) => {
            host.runtime.write().await.lifecycle = HostLifecycle::Failed;
            task.ctx.metrics.chi.host_reconcile_error();
            tracing::warn!(error = %e, host = %host.fq_name(), "host reconcile failed");
        }
    }

    tracing::debug!(host = %host.fq_name(), elapsed_ms = start.elapsed().as_millis(), "host reconcile done");
    result
}

async fn reconcile_host_inner(task: &ReconcileTask<'_>, chi: &Chi, cluster: &Cluster, host: &Host) -> Result<()> {
    let client = task.ctx.client.clone();

    // Step 3: version probe, best-effort; a ReconcileStarted event fires
    // regardless of the probe's outcome.
    let probe = task
        .ctx
        .schemer
        .host_clickhouse_version(
            host,
            VersionProbeOpts {
                skip_new: true,
                skip_stopped_ancestor: true,
            },
        )
        .await;
    match &probe {
        Ok(version) => host.runtime.write().await.version = Some(version.clone()),
        Err(e) => tracing::warn!(error = %e, host = %host.fq_name(), "version probe failed"),
    }
    task.events
        .reconcile_started(format!("reconciling host {}", host.fq_name()))
        .await;

    // Step 4: build the desired stateful set.
    let fctx = FactoryContext {
        chi,
        cluster: Some(cluster),
        host: Some(host),
        include_runtime_options: true,
    };
    let DesiredObject::StatefulSet(desired_sts) = task
        .ctx
        .factory
        .build(ObjectKind::StatefulSetHost, &fctx)
        .ok_or_else(|| Error::UserInputError(format!("no stateful set produced for host {}", host.fq_name())))?
    else {
        return Err(Error::UserInputError("factory kind mismatch for StatefulSetHost".into()));
    };

    // Step 5: exclude from the cluster, then a best-effort drain.
    exclude_host(&client, host).await;
    drain_host(host).await;

    // Step 6: host config map, fatal on error.
    if let Some(DesiredObject::ConfigMap(cm)) = task.ctx.factory.build(ObjectKind::ConfigMapHost, &fctx) {
        configmap::reconcile(client.clone(), &cm, task.registries, task.events).await?;
    }

    // Step 7: annotate has-data based on PVC presence.
    let existing_pvc_count = pvc::count_host_pvcs(client.clone(), host).await?;
    host.runtime.write().await.has_data = existing_pvc_count > 0;

    // Step 8: data-loss dry check escalates the stateful-set and migration
    // options; it never aborts the host by itself.
    let expected_volume_claim_templates = desired_sts
        .spec
        .as_ref()
        .and_then(|s| s.volume_claim_templates.as_ref())
        .map(|v| v.len())
        .unwrap_or(0);
    let data_loss = pvc::dry_check_data_loss(existing_pvc_count, expected_volume_claim_templates);
    if data_loss {
        tracing::warn!(host = %host.fq_name(), "data loss risk detected, forcing stateful set recreate");
    }

    let sts_opts = statefulset::ReconcileStatefulSetOpts {
        force_recreate: data_loss,
        force_restart: host.reconcile_attributes.contains(HostReconcileAttributes::STOPPED),
    };
    let migrate_opts = MigrateTableOpts {
        force_migrate: data_loss,
        drop_replica: data_loss,
    };

    // Step 9: stateful set reconcile. `ErrCRUDIgnore` already collapses to
    // `Ok(())` inside the nested reconciler.
    statefulset::reconcile_host_stateful_set(client.clone(), &desired_sts, sts_opts, task.registries).await?;

    // Step 10: final PVC polish, best-effort.
    pvc::reconcile_host_pvcs(client.clone(), host).await;

    // Step 11: host-local service, best-effort.
    if let Some(DesiredObject::Service(svc)) = task.ctx.factory.build(ObjectKind::ServiceHost, &fctx) {
        if let Err(e) = service::reconcile(client.clone(), &svc, task.registries, task.events).await {
            tracing::warn!(error = %e, host = %host.fq_name(), "host service reconcile failed, continuing");
        }
    }

    // Step 12: the Add bit is transient per-pass state, recomputed by the
    // next action plan diff; nothing further in this pass reads it.

    // Step 13: poll for readiness before migration, best-effort.
    poll_host_version(task, host).await;

    // Step 14: migrate tables.
    task.ctx.schemer.migrate_tables(host, migrate_opts).await?;

    // Step 15: include back into the cluster, fatal on error.
    include_host(&client, host).await?;

    // Step 16: poll once more; a ReconcileCompleted event fires regardless.
    poll_host_version(task, host).await;
    task.events
        .reconcile_completed(format!("host {} reconciled", host.fq_name()))
        .await;

    // Step 17: progress counters.
    let (completed, total) = {
        let mut status = chi.runtime.status.write().await;
        status.hosts_completed_count += 1;
        (status.hosts_completed_count, status.hosts_count)
    };
    task.events.progress_hosts_completed(completed, total).await;

    // Step 18: persist status, best-effort from the host's point of view —
    // the top reconciler persists again at the end of the whole pass.
    let snapshot = chi.runtime.status.read().await.clone();
    if let Err(e) = chi::persist_status(client, task.raw, &snapshot).await {
        tracing::warn!(error = %e, host = %host.fq_name(), "status persist failed");
    }

    Ok(())
}

async fn poll_host_version(task: &ReconcileTask<'_>, host: &Host) {
    if host.reconcile_attributes.contains(HostReconcileAttributes::STOPPED) {
        return;
    }
    let cancel = CancellationToken::new();
    let outcome = poll(PollOptions::default(), &cancel, move || async move {
        task.ctx
            .schemer
            .host_clickhouse_version(host, VersionProbeOpts::default())
            .await
            .is_ok()
    })
    .await;
    if outcome != PollOutcome::Ready {
        tracing::debug!(host = %host.fq_name(), ?outcome, "readiness poll did not observe ready");
    }
}

/// Traffic off: delete the Ready label/annotation. Swallows errors —
/// exclusion failing should not abort the host.
async fn exclude_host(client: &kube::Client, host: &Host) {
    if let Err(e) = ready::delete_label_ready_on_pod(client.clone(), host).await {
        tracing::warn!(error = %e, host = %host.fq_name(), "exclude: pod label removal failed");
    }
    if let Err(e) = ready::delete_annotation_ready_on_service(client.clone(), host).await {
        tracing::warn!(error = %e, host = %host.fq_name(), "exclude: service annotation removal failed");
    }
}

/// Traffic on: append the Ready label/annotation. Fatal on error.
async fn include_host(client: &kube::Client, host: &Host) -> Result<()> {
    ready::append_label_ready_on_pod(client.clone(), host).await?;
    ready::append_annotation_ready_on_service(client.clone(), host).await?;
    Ok(())
}

/// Best-effort wait for in-flight queries to drain after exclusion. No
/// collaborator exposes live query counts (the Schemer contract only covers
/// version probing and table migration), so this is a documented no-op
/// rather than a fabricated wait.
async fn drain_host(_host: &Host) {}

/// Runs ahead of the first host's full mutation sequence. When the CHI is
/// stopped the factory produces no `ServiceCR`, and the aggregate entry
/// service is torn down here, before any host is touched — not after.
async fn reconcile_chi_service_preliminary(task: &ReconcileTask<'_>, chi: &Chi) {
    let fctx = FactoryContext {
        chi,
        cluster: None,
        host: None,
        include_runtime_options: false,
    };
    match task.ctx.factory.build(ObjectKind::ServiceCR, &fctx) {
        Some(DesiredObject::Service(svc)) => {
            if let Err(e) = service::reconcile(task.ctx.client.clone(), &svc, task.registries, task.events).await {
                tracing::warn!(error = %e, chi = %chi.name, "preliminary CHI service reconcile failed");
            }
        }
        _ => {
            let api: KubeApi<k8s_openapi::api::core::v1::Service> =
                KubeApi::namespaced(task.ctx.client.clone(), &chi.namespace);
            if let Err(e) = api.delete_if_exists(&format!("chi-{}", chi.name)).await {
                tracing::warn!(error = %e, chi = %chi.name, "failed to delete CHI entry service while stopped");
            }
        }
    }
}

/// Runs after the first host's full mutation sequence. No-op while the CHI
/// is stopped — the preliminary step already tore the entry service down.
async fn reconcile_chi_service_final(task: &ReconcileTask<'_>, chi: &Chi) {
    if chi.stopped {
        return;
    }
    let fctx = FactoryContext {
        chi,
        cluster: None,
        host: None,
        include_runtime_options: true,
    };
    if let Some(DesiredObject::Service(svc)) = task.ctx.factory.build(ObjectKind::ServiceCR, &fctx) {
        if let Err(e) = service::reconcile(task.ctx.client.clone(), &svc, task.registries, task.events).await {
            tracing::warn!(error = %e, chi = %chi.name, "final CHI service reconcile failed");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use tokio::sync::RwLock as TokioRwLock;

    use crate::controller::Context;
    use crate::crd::chi::{ClickHouseInstallation, ClickHouseInstallationSpec};
    use crate::events::ChiEventRecorder;
    use crate::model::{ChiRuntime, Cluster, HostRuntime, SecretSource};
    use crate::registry::Registries;

    use super::*;

    #[tokio::test]
    async fn cancelled_context_never_touches_host_state() {
        let (ctx, _handle) = Context::test();
        ctx.cancel.cancel();

        let mut raw = ClickHouseInstallation::new("test", ClickHouseInstallationSpec::default());
        raw.meta_mut().namespace = Some("default".into());
        let events = ChiEventRecorder::new(ctx.client.clone(), &raw);
        let registries = Registries::new();
        let task = ReconcileTask {
            raw: &raw,
            ctx: &ctx,
            events: &events,
            registries: &registries,
            full_fan_out: false,
        };

        let chi = Chi {
            namespace: "default".into(),
            name: "test".into(),
            generation: 1,
            stopped: false,
            clusters: vec![],
            runtime: Arc::new(ChiRuntime::new(None)),
        };
        let cluster = Cluster {
            name: "cl".into(),
            index: 0,
            zookeeper: None,
            secret_source: SecretSource::Auto,
            shards: vec![],
        };
        let host = Host {
            chi_name: "test".into(),
            namespace: "default".into(),
            cluster_name: "cl".into(),
            cluster_index: 0,
            shard_index: 0,
            replica_index: 0,
            reconcile_attributes: HostReconcileAttributes::empty(),
            runtime: TokioRwLock::new(HostRuntime::default()),
        };

        // No request is scripted against `_handle`; if cancellation were
        // checked any later than the very top this would hang.
        let result = reconcile_host(&task, &chi, &cluster, &host).await;
        assert!(result.is_ok());
        assert_eq!(host.runtime.read().await.lifecycle, HostLifecycle::Pending);
    }
}
