//! Self-labeling bootstrap: stamps app/version/commit/build-date labels on
//! the operator's own Pod, then its owning ReplicaSet, then its owning
//! Deployment. One-shot, called once from `main` before the controller
//! loop starts.
use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use serde_json::json;

use crate::error::{Error, Result};
use crate::kube_adapter::KubeApi;
use crate::labels::{stamp_operator_labels, OperatorBuildInfo};

fn require_env(name: &'static str) -> Result<String> {
    std::env::var(name).map_err(|_| Error::SelfLabelEnvMissing(name))
}

fn owner_of<'a>(
    owners: &'a [k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference],
    kind: &str,
) -> Option<&'a str> {
    owners
        .iter()
        .find(|o| o.kind == kind)
        .map(|o| o.name.as_str())
}

fn labels_patch(info: &OperatorBuildInfo) -> serde_json::Value {
    let mut labels = BTreeMap::new();
    stamp_operator_labels(&mut labels, info);
    json!({ "metadata": { "labels": labels } })
}

/// Reads `OPERATOR_POD_NAME`/`OPERATOR_POD_NAMESPACE`, walks the
/// ownerReferences tree Pod → ReplicaSet → Deployment, and stamps labels on
/// each. Any missing step is reported as an error naming the offending
/// resource.
pub async fn run(client: Client) -> Result<()> {
    let pod_name = require_env("OPERATOR_POD_NAME")?;
    let namespace = require_env("OPERATOR_POD_NAMESPACE")?;
    run_with(client, &pod_name, &namespace, &OperatorBuildInfo::from_env()).await
}

pub async fn run_with(
    client: Client,
    pod_name: &str,
    namespace: &str,
    info: &OperatorBuildInfo,
) -> Result<()> {
    let pods: KubeApi<Pod> = KubeApi::namespaced(client.clone(), namespace);
    let pod = pods
        .get(pod_name)
        .await?
        .ok_or_else(|| Error::SelfLabelMissingOwner {
            resource: "Pod",
            name: pod_name.to_owned(),
        })?;
    pods.merge_patch(pod_name, &labels_patch(info)).await?;

    let rs_name = pod
        .metadata
        .owner_references
        .as_deref()
        .and_then(|owners| owner_of(owners, "ReplicaSet"))
        .ok_or_else(|| Error::SelfLabelMissingOwner {
            resource: "ReplicaSet",
            name: pod_name.to_owned(),
        })?
        .to_owned();

    let replica_sets: KubeApi<ReplicaSet> = KubeApi::namespaced(client.clone(), namespace);
    let rs = replica_sets
        .get(&rs_name)
        .await?
        .ok_or_else(|| Error::SelfLabelMissingOwner {
            resource: "ReplicaSet",
            name: rs_name.clone(),
        })?;
    replica_sets.merge_patch(&rs_name, &labels_patch(info)).await?;

    let deploy_name = rs
        .metadata
        .owner_references
        .as_deref()
        .and_then(|owners| owner_of(owners, "Deployment"))
        .ok_or_else(|| Error::SelfLabelMissingOwner {
            resource: "Deployment",
            name: rs_name.clone(),
        })?
        .to_owned();

    let deployments: KubeApi<Deployment> = KubeApi::namespaced(client, namespace);
    deployments
        .get(&deploy_name)
        .await?
        .ok_or_else(|| Error::SelfLabelMissingOwner {
            resource: "Deployment",
            name: deploy_name.clone(),
        })?;
    deployments
        .merge_patch(&deploy_name, &labels_patch(info))
        .await?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_env_is_reported_by_name() {
        std::env::remove_var("OPERATOR_POD_NAME_TEST_UNUSED");
        let err = require_env("OPERATOR_POD_NAME_TEST_UNUSED").unwrap_err();
        assert!(matches!(err, Error::SelfLabelEnvMissing("OPERATOR_POD_NAME_TEST_UNUSED")));
    }
}
