//! Service reconciler: `get`; if present, `update`. If the
//! update yields `NotFound` or any other failure, delete-if-exists then
//! `create` — certain service fields (`clusterIP`, etc.) are immutable, so
//! a failed update cannot simply be retried.
use k8s_openapi::api::core::v1::Service;
use kube::Client;

use super::meta_name_namespace;
use crate::error::Result;
use crate::events::ChiEventRecorder;
use crate::kube_adapter::KubeApi;
use crate::registry::{ObjectKind, Registries};

pub async fn reconcile(
    client: Client,
    desired: &Service,
    registries: &Registries,
    events: &ChiEventRecorder,
) -> Result<Service> {
    let (name, namespace) = meta_name_namespace(&desired.metadata)?;
    let api: KubeApi<Service> = KubeApi::namespaced(client, &namespace);

    let result = match api.get(&name).await? {
        Some(_) => match api.apply(&name, desired).await {
            Ok(svc) => Ok(svc),
            Err(_) => {
                api.delete_if_exists(&name).await?;
                api.create(desired).await
            }
        },
        None => api.create(desired).await,
    };

    match result {
        Ok(svc) => {
            registries.reconciled.register(
                ObjectKind::Service,
                &namespace,
                &name,
                svc.metadata.resource_version.clone(),
            );
            Ok(svc)
        }
        Err(e) => {
            registries.failed.register(ObjectKind::Service, &namespace, &name, None);
            events
                .reconcile_failed(format!("service {namespace}/{name}: {e}"))
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

    use crate::crd::chi::{ClickHouseInstallation, ClickHouseInstallationSpec};

    use super::*;

    fn desired() -> Service {
        Service {
            metadata: kube::api::ObjectMeta {
                name: Some("chi-test".into()),
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
    async fn update_attempted_before_create() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        let chi = test_chi();
        let events = ChiEventRecorder::new(client.clone(), &chi);
        let registries = Registries::new();
        let desired = desired();

        let server = tokio::spawn(async move {
            let (req, send) = handle.next_request().await.expect("get not called");
            assert_eq!(req.method(), Method::GET);
            let body = serde_json::to_vec(&desired()).unwrap();
            send.send_response(Response::builder().body(Body::from(body)).unwrap());

            let (req, send) = handle.next_request().await.expect("apply not called");
            assert_eq!(req.method(), Method::PATCH);
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
