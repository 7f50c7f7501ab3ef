//! Schema defaulting/expansion of a raw CHI spec into the canonical tree the
//! core walks.
//!
//! Full schema defaulting and validation of CHI specs lives upstream of the
//! reconciliation core and is assumed to produce a canonical CHI; this
//! module is the minimal expansion needed to exercise that contract: it
//! turns `ClusterSpec { layout: { shards_count, replicas_count } }` into the
//! explicit `model::Cluster/Shard/Host` tree. It does not validate user
//! input beyond what serde's `#[serde(default)]` already guarantees — a
//! real operator's normalization layer additionally defaults pod/volume
//! templates, merges cluster-level and CHI-level settings, etc., none of
//! which the reconciliation core inspects.
use std::sync::Arc;

use kube::ResourceExt;
use tokio::sync::RwLock;

use crate::crd::chi::{ClickHouseInstallation, ClusterSecretSource};
use crate::model::{Chi, ChiRuntime, Cluster, Host, HostRuntime, SecretSource, Shard};

/// Builds the in-memory topology for one reconcile pass.
///
/// `generation` and the identity fields are read off `chi`'s metadata.
/// Generation equality implies no structural change since the last
/// reconcile; that check happens before normalization ever runs, in
/// `chi::reconcile_chi`.
pub fn normalize(chi: &ClickHouseInstallation, ancestor: Option<Arc<ClickHouseInstallation>>) -> Chi {
    let namespace = chi.namespace().unwrap_or_default();
    let name = chi.name_any();
    let stopped = chi.spec.stopped;

    let clusters = chi
        .spec
        .clusters
        .iter()
        .enumerate()
        .map(|(cluster_index, cluster_spec)| {
            let shards = (0..cluster_spec.layout.shards_count.max(1))
                .map(|shard_index| {
                    let shard_index = shard_index as usize;
                    let hosts = (0..cluster_spec.layout.replicas_count.max(1))
                        .map(|replica_index| Host {
                            chi_name: name.clone(),
                            namespace: namespace.clone(),
                            cluster_name: cluster_spec.name.clone(),
                            cluster_index,
                            shard_index,
                            replica_index: replica_index as usize,
                            reconcile_attributes: Default::default(),
                            runtime: RwLock::new(HostRuntime {
                                has_data: false,
                                ..HostRuntime::default()
                            }),
                        })
                        .collect();
                    Shard {
                        index: shard_index,
                        hosts,
                    }
                })
                .collect();

            Cluster {
                name: cluster_spec.name.clone(),
                index: cluster_index,
                zookeeper: cluster_spec.zookeeper.clone(),
                secret_source: match cluster_spec.secret.source {
                    ClusterSecretSource::Auto => SecretSource::Auto,
                    ClusterSecretSource::Manual => SecretSource::Manual,
                },
                shards,
            }
        })
        .collect();

    Chi {
        namespace,
        name,
        generation: chi.meta().generation.unwrap_or_default(),
        stopped,
        clusters,
        runtime: Arc::new(ChiRuntime::new(ancestor)),
    }
}
