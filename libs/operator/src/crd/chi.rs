//! The `ClickHouseInstallation` (CHI) custom resource.
//!
//! Derived with `kube::CustomResource` and `schemars::JsonSchema`, with a
//! richer multi-field spec/status surface than a single-knob CRD needs,
//! since a stateful, topology-aware installation has a lot more to say
//! about itself than a replica count.
use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `(namespace, name)` identity plus the declarative desired state of a
/// ClickHouse installation.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    group = "clickhouse.altinity.com",
    version = "v1",
    kind = "ClickHouseInstallation",
    shortname = "chi",
    namespaced
)]
#[kube(status = "ClickHouseInstallationStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseInstallationSpec {
    /// When `true`, the CHI-wide entry service is torn down and no host is
    /// expected to serve traffic.
    #[serde(default)]
    pub stopped: bool,

    /// Named clusters, each owning zero or more shards.
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,

    /// Free-form ClickHouse `users.xml`/`config.xml` fragments merged into
    /// the common and users config maps. The object factory is the only
    /// consumer; the core never interprets these.
    #[serde(default)]
    pub configuration: ConfigurationSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSpec {
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub users: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub name: String,

    #[serde(default)]
    pub layout: ClusterLayout,

    pub zookeeper: Option<ZookeeperConfig>,

    #[serde(default)]
    pub secret: ClusterSecret,
}

/// Shard/replica counts a real operator's normalization layer expands into
/// the explicit `model::Cluster` tree this crate's `normalize` module
/// walks.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLayout {
    #[serde(default = "default_count")]
    pub shards_count: u32,
    #[serde(default = "default_count")]
    pub replicas_count: u32,
}

fn default_count() -> u32 {
    1
}

impl Default for ClusterLayout {
    fn default() -> Self {
        Self {
            shards_count: default_count(),
            replicas_count: default_count(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZookeeperConfig {
    pub nodes: Vec<String>,
    #[serde(default = "default_zk_root")]
    pub root: String,
}

fn default_zk_root() -> String {
    "/".to_owned()
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ClusterSecretSource {
    Auto,
    #[default]
    Manual,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSecret {
    #[serde(default)]
    pub source: ClusterSecretSource,
}

/// The status object of `ClickHouseInstallation`. Updated with a
/// partial merge patch so ancillary fields another controller may be
/// writing aren't clobbered.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseInstallationStatus {
    pub hosts_count: u32,
    pub hosts_completed_count: u32,
    pub action: Option<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}
