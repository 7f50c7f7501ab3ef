//! Diff of old vs new normalized CHI into a per-host action plan.
use std::collections::{HashMap, HashSet};

use crate::model::{Chi, HostReconcileAttributes};

type HostKey = (String, usize, usize);

fn host_key(cluster_name: &str, shard_index: usize, replica_index: usize) -> HostKey {
    (cluster_name.to_owned(), shard_index, replica_index)
}

/// Immutable snapshot derived from `diff(old, new)`.
#[derive(Debug)]
pub struct ActionPlan {
    attrs: HashMap<HostKey, HostReconcileAttributes>,
    add_only: bool,
    has_actions: bool,
}

impl ActionPlan {
    /// `old` is `None` on the very first reconcile of a CHI.
    pub fn build(old: Option<&Chi>, new: &Chi) -> Self {
        let old_keys: HashSet<HostKey> = old
            .map(|o| {
                o.hosts()
                    .map(|h| host_key(&h.cluster_name, h.shard_index, h.replica_index))
                    .collect()
            })
            .unwrap_or_default();
        let new_keys: HashSet<HostKey> = new
            .hosts()
            .map(|h| host_key(&h.cluster_name, h.shard_index, h.replica_index))
            .collect();

        let stopped_changed = old.map(|o| o.stopped) != Some(new.stopped);
        let any_removed = old_keys.difference(&new_keys).next().is_some();

        let mut attrs = HashMap::with_capacity(new_keys.len());
        let mut has_actions = any_removed;
        let mut all_added = !new_keys.is_empty();

        for h in new.hosts() {
            let k = host_key(&h.cluster_name, h.shard_index, h.replica_index);
            let mut a = HostReconcileAttributes::empty();
            if !old_keys.contains(&k) {
                a |= HostReconcileAttributes::ADD | HostReconcileAttributes::NEW;
                has_actions = true;
            } else {
                a |= HostReconcileAttributes::FOUND;
                all_added = false;
                if stopped_changed {
                    a |= HostReconcileAttributes::MODIFY;
                    has_actions = true;
                }
            }
            if new.stopped {
                a |= HostReconcileAttributes::STOPPED;
            }
            attrs.insert(k, a);
        }

        let add_only = all_added && !any_removed;

        Self {
            attrs,
            add_only,
            has_actions,
        }
    }

    pub fn has_actions_to_do(&self) -> bool {
        self.has_actions
    }

    /// `true` when every host in the plan is a pure addition — enables
    /// full fan-out.
    pub fn add_only(&self) -> bool {
        self.add_only
    }

    /// Writes the precomputed attributes onto each host of `chi`.
    pub fn apply(&self, chi: &mut Chi) {
        for h in chi.hosts_mut() {
            let k = host_key(&h.cluster_name, h.shard_index, h.replica_index);
            if let Some(a) = self.attrs.get(&k) {
                h.reconcile_attributes = *a;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crd::chi::ClickHouseInstallation;
    use crate::normalize::normalize;

    fn chi_with_shards(stopped: bool, shards: u32, replicas: u32) -> Chi {
        use crate::crd::chi::{ClusterLayout, ClusterSpec};
        let mut raw = ClickHouseInstallation::new("test", Default::default());
        raw.meta_mut().namespace = Some("default".into());
        raw.spec.stopped = stopped;
        raw.spec.clusters = vec![ClusterSpec {
            name: "cluster1".into(),
            layout: ClusterLayout {
                shards_count: shards,
                replicas_count: replicas,
            },
            zookeeper: None,
            secret: Default::default(),
        }];
        normalize(&raw, None)
    }

    #[test]
    fn new_chi_is_add_only() {
        let new = chi_with_shards(false, 1, 2);
        let plan = ActionPlan::build(None, &new);
        assert!(plan.add_only());
        assert!(plan.has_actions_to_do());
    }

    #[test]
    fn unchanged_topology_has_no_actions() {
        let old = chi_with_shards(false, 1, 2);
        let new = chi_with_shards(false, 1, 2);
        let plan = ActionPlan::build(Some(&old), &new);
        assert!(!plan.has_actions_to_do());
        assert!(!plan.add_only());
    }

    #[test]
    fn added_shard_is_not_add_only() {
        let old = chi_with_shards(false, 1, 2);
        let new = chi_with_shards(false, 2, 2);
        let plan = ActionPlan::build(Some(&old), &new);
        assert!(plan.has_actions_to_do());
        assert!(!plan.add_only());
    }

    #[test]
    fn stopped_flag_change_marks_modify() {
        let old = chi_with_shards(false, 1, 1);
        let mut new = chi_with_shards(true, 1, 1);
        let plan = ActionPlan::build(Some(&old), &new);
        assert!(plan.has_actions_to_do());
        plan.apply(&mut new);
        let host = new.hosts().next().unwrap();
        assert!(host
            .reconcile_attributes
            .contains(HostReconcileAttributes::MODIFY));
        assert!(host
            .reconcile_attributes
            .contains(HostReconcileAttributes::STOPPED));
    }
}
