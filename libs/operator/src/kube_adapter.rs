//! Uniform CRUD over Pod, Service, ReplicaSet, Deployment, StatefulSet,
//! ConfigMap, Secret, PVC and PDB.
//!
//! Each per-object reconciler needs the same two shapes: "apply the whole
//! desired object" (config maps, services, secrets, stateful sets, PDBs)
//! and "merge-patch a handful of fields" (labels/annotations on pods and
//! services, in `ready`/`selflabel`). `KubeApi<K>` wraps a namespaced
//! `kube::Api<K>` and collapses 404s into `Ok(None)` so callers branch on
//! `Option`, not on `Error::is_not_found()`.
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;

use crate::error::{ignore_not_found, Result};

/// Field manager used for every server-side apply this core performs.
pub const FIELD_MANAGER: &str = "chop-operator";

pub struct KubeApi<K> {
    api: Api<K>,
}

impl<K> KubeApi<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Serialize,
{
    pub fn namespaced(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    /// `get`; collapses 404 into `Ok(None)`.
    pub async fn get(&self, name: &str) -> Result<Option<K>> {
        ignore_not_found(self.api.get(name).await.map_err(Into::into))
    }

    /// Server-side apply of the whole desired object. Used by reconcilers
    /// that mutate the full object (config map, service, secret body,
    /// stateful set, PDB).
    pub async fn apply(&self, name: &str, desired: &K) -> Result<K> {
        self.api
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(desired),
            )
            .await
            .map_err(Into::into)
    }

    pub async fn create(&self, desired: &K) -> Result<K> {
        self.api
            .create(&PostParams::default(), desired)
            .await
            .map_err(Into::into)
    }

    /// Delete, treating an already-absent object as success.
    pub async fn delete_if_exists(&self, name: &str) -> Result<()> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err: crate::error::Error = e.into();
                if err.is_not_found() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// JSON merge-patch a subset of fields (labels/annotations) without
    /// touching the rest of the object. Used by the Ready label/annotation
    /// manager and the self-labeling bootstrap.
    pub async fn merge_patch(&self, name: &str, patch: &Value) -> Result<K> {
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(Into::into)
    }
}
