//! PodDisruptionBudget reconciler: `get`; on success
//! `update` propagating `resourceVersion`; on `NotFound`, `create`. Update
//! failures are logged but **not** propagated (soft — a stale PDB is never
//! worth aborting a reconcile pass over).
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::Client;

use super::meta_name_namespace;
use crate::error::Result;
use crate::kube_adapter::KubeApi;
use crate::registry::{ObjectKind, Registries};

pub async fn reconcile(client: Client, desired: &PodDisruptionBudget, registries: &Registries) -> Result<()> {
    let (name, namespace) = meta_name_namespace(&desired.metadata)?;
    let api: KubeApi<PodDisruptionBudget> = KubeApi::namespaced(client, &namespace);

    match api.get(&name).await? {
        Some(existing) => {
            let mut desired = desired.clone();
            desired.metadata.resource_version = existing.metadata.resource_version;
            match api.apply(&name, &desired).await {
                Ok(pdb) => {
                    registries.reconciled.register(
                        ObjectKind::Pdb,
                        &namespace,
                        &name,
                        pdb.metadata.resource_version,
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, %namespace, %name, "pdb update failed, ignoring");
                }
            }
        }
        None => {
            let pdb = api.create(desired).await.inspect_err(|_| {
                registries.failed.register(ObjectKind::Pdb, &namespace, &name, None);
            })?;
            registries
                .reconciled
                .register(ObjectKind::Pdb, &namespace, &name, pdb.metadata.resource_version);
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use assert_json_diff::assert_json_include;
    use http::{Method, Request, Response};
    use kube::client::Body;
    use kube::Client;
    use serde_json::json;

    use super::*;

    fn desired() -> PodDisruptionBudget {
        PodDisruptionBudget {
            metadata: kube::api::ObjectMeta {
                name: Some("chi-test-cl-pdb".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_pdb_is_created() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        let registries = Registries::new();
        let desired = desired();

        let server = tokio::spawn(async move {
            let (req, send) = handle.next_request().await.expect("get not called");
            assert_eq!(req.method(), Method::GET);
            let not_found = serde_json::to_vec(&json!({
                "status": "Failure",
                "message": "poddisruptionbudgets \"chi-test-cl-pdb\" not found",
                "reason": "NotFound",
                "code": 404,
            }))
            .unwrap();
            send.send_response(Response::builder().status(404).body(Body::from(not_found)).unwrap());

            let (req, send) = handle.next_request().await.expect("create not called");
            assert_eq!(req.method(), Method::POST);
            let body = serde_json::to_vec(&desired()).unwrap();
            send.send_response(Response::builder().body(Body::from(body)).unwrap());
        });

        let result = reconcile(client, &desired, &registries).await;
        assert!(result.is_ok());
        tokio::time::timeout(std::time::Duration::from_secs(1), server)
            .await
            .expect("server task timed out")
            .unwrap();
    }

    #[tokio::test]
    async fn existing_pdb_propagates_resource_version_on_update() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        let registries = Registries::new();
        let desired = desired();

        let server = tokio::spawn(async move {
            let (req, send) = handle.next_request().await.expect("get not called");
            assert_eq!(req.method(), Method::GET);
            let mut existing = desired();
            existing.metadata.resource_version = Some("42".into());
            let body = serde_json::to_vec(&existing).unwrap();
            send.send_response(Response::builder().body(Body::from(body)).unwrap());

            let (req, send) = handle.next_request().await.expect("apply not called");
            assert_eq!(req.method(), Method::PATCH);
            let mut applied = desired();
            applied.metadata.resource_version = Some("42".into());
            assert_json_include!(
                actual: serde_json::to_value(&applied).unwrap(),
                expected: json!({"metadata": {"resourceVersion": "42", "name": "chi-test-cl-pdb"}}),
            );
            let body = serde_json::to_vec(&applied).unwrap();
            send.send_response(Response::builder().body(Body::from(body)).unwrap());
        });

        let result = reconcile(client, &desired, &registries).await;
        assert!(result.is_ok());
        assert!(registries.reconciled.contains(ObjectKind::Pdb, "default", "chi-test-cl-pdb"));
        tokio::time::timeout(std::time::Duration::from_secs(1), server)
            .await
            .expect("server task timed out")
            .unwrap();
    }
}
