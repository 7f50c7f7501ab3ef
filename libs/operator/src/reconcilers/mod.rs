//! Per-object reconcilers: one module each for ConfigMap,
//! Service, Secret, PDB, StatefulSet, PVC. Every reconciler implements
//! upsert with a kind-specific fallback and registers its outcome into the
//! pass-scoped [`crate::registry::Registries`].
pub mod configmap;
pub mod pdb;
pub mod pvc;
pub mod secret;
pub mod service;
pub mod statefulset;

fn meta_name_namespace(
    meta: &kube::api::ObjectMeta,
) -> crate::error::Result<(String, String)> {
    let name = meta
        .name
        .clone()
        .ok_or_else(|| crate::error::Error::UserInputError("desired object missing name".into()))?;
    let namespace = meta.namespace.clone().ok_or_else(|| {
        crate::error::Error::UserInputError("desired object missing namespace".into())
    })?;
    Ok((name, namespace))
}
