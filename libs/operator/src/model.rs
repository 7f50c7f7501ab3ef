//! The normalized, in-memory topology a reconcile pass walks.
//!
//! Every pass rebuilds this tree from the normalized CHI; nothing here is
//! retained across passes and none of it is serialized back to
//! Kubernetes — it exists purely to drive the reconciliation walk.
use std::sync::Arc;

use bitflags::bitflags;
use semver::Version;
use tokio::sync::RwLock;

use crate::crd::chi::{ClickHouseInstallation, ZookeeperConfig};

bitflags! {
    /// Precomputed per-host reconcile attributes, produced by the action
    /// plan and consumed by the host state machine.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct HostReconcileAttributes: u8 {
        const ADD      = 0b0000_0001;
        const MODIFY   = 0b0000_0010;
        const REMOVE   = 0b0000_0100;
        const FOUND    = 0b0000_1000;
        const NEW      = 0b0001_0000;
        const STOPPED  = 0b0010_0000;
    }
}

impl Default for HostReconcileAttributes {
    fn default() -> Self {
        HostReconcileAttributes::empty()
    }
}

/// Lifecycle states of a single host across a reconcile pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HostLifecycle {
    #[default]
    Pending,
    Reconciling,
    Completed,
    Failed,
}

/// Runtime-only fields tracked on a host while it is being reconciled.
#[derive(Debug, Default)]
pub struct HostRuntime {
    pub address: Option<String>,
    pub version: Option<Version>,
    pub has_data: bool,
    pub lifecycle: HostLifecycle,
}

/// `(chi, cluster, shard, replica)` — a single ClickHouse replica.
#[derive(Debug)]
pub struct Host {
    pub chi_name: String,
    pub namespace: String,
    pub cluster_name: String,
    pub cluster_index: usize,
    pub shard_index: usize,
    pub replica_index: usize,
    pub reconcile_attributes: HostReconcileAttributes,
    pub runtime: RwLock<HostRuntime>,
}

impl Host {
    pub fn is_first_in_chi(&self) -> bool {
        self.cluster_index == 0 && self.shard_index == 0 && self.replica_index == 0
    }

    /// Fully-qualified name used to key per-object reconcilers and status.
    pub fn fq_name(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.chi_name, self.cluster_name, self.shard_index, self.replica_index
        )
    }
}

/// Child of Cluster; owns an ordered list of Hosts. Index is positional
/// within its cluster.
#[derive(Debug)]
pub struct Shard {
    pub index: usize,
    pub hosts: Vec<Host>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretSource {
    Auto,
    Manual,
}

/// Child of CHI. Owns zero or more shards; carries Zookeeper config and an
/// auto-secret source flag.
#[derive(Debug)]
pub struct Cluster {
    pub name: String,
    pub index: usize,
    pub zookeeper: Option<ZookeeperConfig>,
    pub secret_source: SecretSource,
    pub shards: Vec<Shard>,
}

impl Cluster {
    pub fn host_count(&self) -> usize {
        self.shards.iter().map(|s| s.hosts.len()).sum()
    }
}

/// Immutable, per-reconcile-pass status counters mirrored onto the CHI
/// status subresource.
#[derive(Debug, Default, Clone)]
pub struct ChiReconcileStatus {
    pub hosts_count: u32,
    pub hosts_completed_count: u32,
    pub action: Option<String>,
    pub actions: Vec<String>,
    pub error: Option<String>,
    pub errors: Vec<String>,
}

/// Shared, mutable state scoped to a single reconcile pass of one CHI.
pub struct ChiRuntime {
    /// Ancestor reference: the previously reconciled CHI. `None` only on the
    /// first reconcile.
    pub ancestor: Option<Arc<ClickHouseInstallation>>,
    /// Dedicated lock serializing common-config-map reconciles against any
    /// background readers.
    pub common_config_lock: tokio::sync::Mutex<()>,
    pub status: RwLock<ChiReconcileStatus>,
}

impl ChiRuntime {
    pub fn new(ancestor: Option<Arc<ClickHouseInstallation>>) -> Self {
        Self {
            ancestor,
            common_config_lock: tokio::sync::Mutex::new(()),
            status: RwLock::new(ChiReconcileStatus::default()),
        }
    }
}

/// The normalized topology for one reconcile pass: identity plus the
/// cluster/shard/host tree built fresh from the canonical spec.
pub struct Chi {
    pub namespace: String,
    pub name: String,
    pub generation: i64,
    pub stopped: bool,
    pub clusters: Vec<Cluster>,
    pub runtime: Arc<ChiRuntime>,
}

impl Chi {
    pub fn host_count(&self) -> usize {
        self.clusters.iter().map(Cluster::host_count).sum()
    }

    /// Iterate hosts in fixed topology order: cluster, then shard, then
    /// replica — the order the reconcile pass walks the tree in.
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.clusters
            .iter()
            .flat_map(|c| c.shards.iter())
            .flat_map(|s| s.hosts.iter())
    }

    pub fn hosts_mut(&mut self) -> impl Iterator<Item = &mut Host> {
        self.clusters
            .iter_mut()
            .flat_map(|c| c.shards.iter_mut())
            .flat_map(|s| s.hosts.iter_mut())
    }
}
