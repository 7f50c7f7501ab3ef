//! Secret reconciler: secrets are never updated in place. If
//! `get` succeeds, the existing secret is treated as up-to-date and
//! returned unchanged. Otherwise delete-if-exists, then create.
use k8s_openapi::api::core::v1::Secret;
use kube::Client;

use super::meta_name_namespace;
use crate::error::Result;
use crate::events::ChiEventRecorder;
use crate::kube_adapter::KubeApi;
use crate::registry::{ObjectKind, Registries};

pub async fn reconcile(
    client: Client,
    desired: &Secret,
    registries: &Registries,
    events: &ChiEventRecorder,
) -> Result<Secret> {
    let (name, namespace) = meta_name_namespace(&desired.metadata)?;
    let api: KubeApi<Secret> = KubeApi::namespaced(client, &namespace);

    let result = match api.get(&name).await? {
        Some(existing) => Ok(existing),
        None => {
            api.delete_if_exists(&name).await?;
            api.create(desired).await
        }
    };

    match result {
        Ok(secret) => {
            registries.reconciled.register(
                ObjectKind::Secret,
                &namespace,
                &name,
                secret.metadata.resource_version.clone(),
            );
            Ok(secret)
        }
        Err(e) => {
            registries.failed.register(ObjectKind::Secret, &namespace, &name, None);
            events
                .reconcile_failed(format!("secret {namespace}/{name}: {e}"))
                .await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod test {
    use http::{Method, Request, Response};
    use kube::client::Body;
    use kube::Client;
    use serde_json::json;

    use crate::crd::chi::{ClickHouseInstallation, ClickHouseInstallationSpec};

    use super::*;

    fn desired() -> Secret {
        Secret {
            metadata: kube::api::ObjectMeta {
                name: Some("chi-test-cl-secret".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn test_chi() -> ClickHouseInstallation {
        let mut chi = ClickHouseInstallation::new("test", ClickHouseInstallationSpec::default());
        chi.meta_mut().namespace = Some("default".into());
        chi
    }

    #[tokio::test]
    async fn existing_secret_is_never_updated() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        let chi = test_chi();
        let events = ChiEventRecorder::new(client.clone(), &chi);
        let registries = Registries::new();
        let desired = desired();

        let server = tokio::spawn(async move {
            // The only request this reconciler is allowed to make for an
            // existing secret is the GET; the task below drops the handle
            // immediately after, so a second request would fail the test
            // instead of hanging it.
            let (req, send) = handle.next_request().await.expect("get not called");
            assert_eq!(req.method(), Method::GET);
            let body = serde_json::to_vec(&desired()).unwrap();
            send.send_response(Response::builder().body(Body::from(body)).unwrap());
        });

        let result = reconcile(client, &desired, &registries, &events).await;
        assert!(result.is_ok());
        tokio::time::timeout(std::time::Duration::from_secs(1), server)
            .await
            .expect("server task timed out")
            .unwrap();
    }

    #[tokio::test]
    async fn missing_secret_is_recreated() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        let chi = test_chi();
        let events = ChiEventRecorder::new(client.clone(), &chi);
        let registries = Registries::new();
        let desired = desired();

        let server = tokio::spawn(async move {
            let (req, send) = handle.next_request().await.expect("get not called");
            assert_eq!(req.method(), Method::GET);
            let not_found = serde_json::to_vec(&json!({
                "status": "Failure",
                "message": "secrets \"chi-test-cl-secret\" not found",
                "reason": "NotFound",
                "code": 404,
            }))
            .unwrap();
            send.send_response(Response::builder().status(404).body(Body::from(not_found)).unwrap());

            let (req, send) = handle.next_request().await.expect("delete not called");
            assert_eq!(req.method(), Method::DELETE);
            let not_found = serde_json::to_vec(&json!({
                "status": "Failure",
                "message": "secrets \"chi-test-cl-secret\" not found",
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

        let result = reconcile(client, &desired, &registries, &events).await;
        assert!(result.is_ok());
        tokio::time::timeout(std::time::Duration::from_secs(1), server)
            .await
            .expect("server task timed out")
            .unwrap();
    }
}
