//! Cluster-level reconciler: cluster service, optional auto-generated
//! secret, PodDisruptionBudget, and a best-effort Zookeeper root-path
//! bootstrap, ahead of the shard/host recursion.
use crate::chi::ReconcileTask;
use crate::factory::{DesiredObject, FactoryContext, ObjectKind};
use crate::model::{Chi, Cluster};
use crate::reconcilers::{pdb, secret, service};
use crate::error::Result;

pub async fn reconcile_cluster(task: &ReconcileTask<'_>, chi: &Chi, cluster: &Cluster) -> Result<()> {
    if task.ctx.cancel.is_cancelled() {
        return Ok(());
    }

    let fctx = FactoryContext {
        chi,
        cluster: Some(cluster),
        host: None,
        include_runtime_options: false,
    };

    if let Some(DesiredObject::Service(svc)) = task.ctx.factory.build(ObjectKind::ServiceCluster, &fctx) {
        service::reconcile(task.ctx.client.clone(), &svc, task.registries, task.events).await?;
    }

    if let Some(DesiredObject::Secret(sec)) = task.ctx.factory.build(ObjectKind::ClusterAutoSecret, &fctx) {
        secret::reconcile(task.ctx.client.clone(), &sec, task.registries, task.events).await?;
    }

    if let Some(DesiredObject::Pdb(podb)) = task.ctx.factory.build(ObjectKind::Pdb, &fctx) {
        pdb::reconcile(task.ctx.client.clone(), &podb, task.registries).await?;
    }

    reconcile_zookeeper(task, cluster).await;

    Ok(())
}

/// Zookeeper errors are non-fatal: open, ensure the
/// configured root path exists, close, logging any failure along the way.
async fn reconcile_zookeeper(task: &ReconcileTask<'_>, cluster: &Cluster) {
    let Some(zk) = &cluster.zookeeper else {
        return;
    };
    if let Err(e) = task.ctx.zookeeper.open(&zk.nodes).await {
        tracing::warn!(error = %e, cluster = %cluster.name, "zookeeper open failed, continuing");
        return;
    }
    if let Err(e) = task.ctx.zookeeper.ensure_root(&zk.root).await {
        tracing::warn!(error = %e, cluster = %cluster.name, root = %zk.root, "zookeeper ensure_root failed");
    }
    if let Err(e) = task.ctx.zookeeper.close().await {
        tracing::warn!(error = %e, cluster = %cluster.name, "zookeeper close failed");
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::controller::Context;
    use crate::crd::chi::{ClickHouseInstallation, ClickHouseInstallationSpec};
    use crate::events::ChiEventRecorder;
    use crate::model::{ChiRuntime, SecretSource};
    use crate::registry::Registries;

    use super::*;

    #[tokio::test]
    async fn cancelled_context_skips_cluster_reconcile() {
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

        // No request is scripted against `_handle`; a real call would hang.
        let result = reconcile_cluster(&task, &chi, &cluster).await;
        assert!(result.is_ok());
    }
}
