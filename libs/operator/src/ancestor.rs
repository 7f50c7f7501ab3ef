//! Ancestor tracking: remembers the previously reconciled CHI so the next
//! pass can diff against it. Returns `None` only on the first reconcile of
//! a given CHI.
//!
//! `kube::runtime::Controller` hands the reconciler the current object only;
//! it does not retain the previous one for us. This store is the in-process
//! substitute: after every successful reconcile pass the top reconciler
//! records the CHI it just reconciled, keyed by identity, so the next pass
//! can diff against it.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::crd::chi::ClickHouseInstallation;

type ChiKey = (String, String);

#[derive(Default)]
pub struct AncestorStore {
    ancestors: Mutex<HashMap<ChiKey, Arc<ClickHouseInstallation>>>,
}

impl AncestorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(namespace: &str, name: &str) -> ChiKey {
        (namespace.to_owned(), name.to_owned())
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<ClickHouseInstallation>> {
        self.ancestors
            .lock()
            .expect("ancestor store mutex poisoned")
            .get(&Self::key(namespace, name))
            .cloned()
    }

    pub fn set(&self, namespace: &str, name: &str, chi: Arc<ClickHouseInstallation>) {
        self.ancestors
            .lock()
            .expect("ancestor store mutex poisoned")
            .insert(Self::key(namespace, name), chi);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn returns_none_before_first_set() {
        let store = AncestorStore::new();
        assert!(store.get("ns", "chi1").is_none());
    }

    #[test]
    fn remembers_the_last_set_value() {
        let store = AncestorStore::new();
        let chi = Arc::new(ClickHouseInstallation::new("chi1", Default::default()));
        store.set("ns", "chi1", chi.clone());
        assert!(store.get("ns", "chi1").is_some());
        assert!(store.get("ns", "other").is_none());
    }
}
