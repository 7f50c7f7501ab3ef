//! Shard fan-out: shard `0` of each cluster is a synchronous canary unless
//! the whole pass is a full fan-out (every host is a pure addition); the
//! remaining shards run in literal batches of
//! [`crate::config::OperatorConfig::workers_num`] shards, one batch joined
//! to completion before the next is started. Hosts within a shard are
//! always reconciled sequentially — a shard's own replicas must never race
//! each other.
use futures::future;

use crate::chi::ReconcileTask;
use crate::error::Result;
use crate::host;
use crate::model::{Chi, Cluster, Shard};

pub async fn reconcile_shards_and_hosts(task: &ReconcileTask<'_>, chi: &Chi) -> Result<()> {
    for cluster in &chi.clusters {
        if task.ctx.cancel.is_cancelled() {
            return Ok(());
        }
        reconcile_cluster_shards(task, chi, cluster).await?;
    }
    Ok(())
}

async fn reconcile_cluster_shards(task: &ReconcileTask<'_>, chi: &Chi, cluster: &Cluster) -> Result<()> {
    if cluster.shards.is_empty() {
        return Ok(());
    }

    // A full fan-out (every host is a pure addition) drops the canary:
    // all shards, including shard 0, join the concurrent cohort.
    let cohort: &[Shard] = if task.full_fan_out {
        &cluster.shards
    } else {
        let Some((canary, rest)) = cluster.shards.split_first() else {
            return Ok(());
        };
        reconcile_shard(task, chi, cluster, canary).await?;
        rest
    };

    if cohort.is_empty() {
        return Ok(());
    }

    let workers = task.ctx.config.workers_num(cluster.shards.len(), task.full_fan_out).max(1);
    task.ctx.metrics.chi.observe_shard_cohort_size(workers.min(cohort.len()));

    // Batches of at most `workers` shards, joined to completion before the
    // next batch is even started: a failure in one batch must not let a
    // later batch's shards begin.
    for batch in cohort.chunks(workers) {
        if task.ctx.cancel.is_cancelled() {
            return Ok(());
        }
        let results = future::join_all(batch.iter().map(|shard| reconcile_shard(task, chi, cluster, shard))).await;
        if let Some(e) = results.into_iter().find_map(|r| r.err()) {
            return Err(e);
        }
    }

    Ok(())
}

async fn reconcile_shard(task: &ReconcileTask<'_>, chi: &Chi, cluster: &Cluster, shard: &Shard) -> Result<()> {
    for h in &shard.hosts {
        host::reconcile_host(task, chi, cluster, h).await?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use tokio::sync::RwLock;

    use crate::controller::Context;
    use crate::crd::chi::{ClickHouseInstallation, ClickHouseInstallationSpec};
    use crate::events::ChiEventRecorder;
    use crate::model::{ChiRuntime, Host, HostReconcileAttributes, HostRuntime, SecretSource};
    use crate::registry::Registries;

    use super::*;

    fn host(cluster_index: usize, shard_index: usize, replica_index: usize) -> Host {
        Host {
            chi_name: "test".into(),
            namespace: "default".into(),
            cluster_name: "cl".into(),
            cluster_index,
            shard_index,
            replica_index,
            reconcile_attributes: HostReconcileAttributes::empty(),
            runtime: RwLock::new(HostRuntime::default()),
        }
    }

    #[tokio::test]
    async fn cancelled_context_skips_every_shard() {
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
            clusters: vec![Cluster {
                name: "cl".into(),
                index: 0,
                zookeeper: None,
                secret_source: SecretSource::Auto,
                shards: vec![
                    Shard {
                        index: 0,
                        hosts: vec![host(0, 0, 0)],
                    },
                    Shard {
                        index: 1,
                        hosts: vec![host(0, 1, 0)],
                    },
                ],
            }],
            runtime: Arc::new(ChiRuntime::new(None)),
        };

        // No request is scripted against `_handle`; a live shard/host
        // reconcile would hang waiting on the mock apiserver.
        let result = reconcile_shards_and_hosts(&task, &chi).await;
        assert!(result.is_ok());
    }
}
