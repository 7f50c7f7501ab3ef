//! Per-pass Reconciled/Failed registries.
//!
//! Written only by the single thread completing each per-object reconcile
//! — hosts on different shards never conflict — so a plain `HashMap`
//! behind a `Mutex` is sufficient; no lock is ever held across an `.await`.
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    ConfigMap,
    Service,
    Secret,
    StatefulSet,
    Pvc,
    Pdb,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct RegisteredObject {
    pub resource_version: Option<String>,
}

#[derive(Default)]
pub struct Registry {
    objects: std::sync::Mutex<HashMap<ObjectRef, RegisteredObject>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: ObjectKind, namespace: &str, name: &str, resource_version: Option<String>) {
        let key = ObjectRef {
            kind,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        };
        self.objects
            .lock()
            .expect("registry mutex poisoned")
            .insert(key, RegisteredObject { resource_version });
    }

    pub fn contains(&self, kind: ObjectKind, namespace: &str, name: &str) -> bool {
        let key = ObjectRef {
            kind,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        };
        self.objects.lock().expect("registry mutex poisoned").contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().expect("registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Objects present in `old` but absent from this registry are stale and
    /// should be deleted by `chi::clean`.
    pub fn stale(&self, old: &[ObjectRef]) -> Vec<ObjectRef> {
        let objects = self.objects.lock().expect("registry mutex poisoned");
        old.iter()
            .filter(|r| !objects.contains_key(r))
            .cloned()
            .collect()
    }
}

/// Two registries per reconcile pass: Reconciled and Failed.
#[derive(Default)]
pub struct Registries {
    pub reconciled: Registry,
    pub failed: Registry,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }
}
