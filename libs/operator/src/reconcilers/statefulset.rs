//! StatefulSet reconciler: the nested reconciler that owns the
//! rolling-update protocol and the `ErrCRUDIgnore`/`ErrCRUDAbort` sentinels.
//! Readiness polling of pods is the caller's job (`poller::poll`), invoked
//! from `host` around this call.
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::Client;

use super::meta_name_namespace;
use crate::error::{Error, Result};
use crate::kube_adapter::KubeApi;
use crate::registry::{ObjectKind, Registries};

/// Options threaded down from the host state machine's data-loss
/// escalation and force-restart decisions.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReconcileStatefulSetOpts {
    /// Delete-and-recreate instead of apply; set when the storage
    /// reconciler detected data loss on the live PVCs.
    pub force_recreate: bool,
    /// First reconcile with `replicas=0` (shutdown phase), then the
    /// desired object — `shouldForceRestartHost` in the host state machine.
    pub force_restart: bool,
}

async fn apply_or_recreate(
    api: &KubeApi<StatefulSet>,
    name: &str,
    desired: &StatefulSet,
    force_recreate: bool,
) -> Result<StatefulSet> {
    if force_recreate {
        api.delete_if_exists(name).await?;
        return api.create(desired).await;
    }
    match api.get(name).await? {
        Some(_) => match api.apply(name, desired).await {
            Ok(sts) => Ok(sts),
            Err(e) if e.is_not_found() => api.create(desired).await,
            Err(e) if e.is_conflict() => Err(Error::CrudIgnore),
            Err(e) => Err(e),
        },
        None => api.create(desired).await,
    }
}

/// `Err(Error::CrudIgnore)` collapses to `Ok(())` here; everything else is
/// fatal and the caller marks the host `HostFailed`.
pub async fn reconcile_host_stateful_set(
    client: Client,
    desired: &StatefulSet,
    opts: ReconcileStatefulSetOpts,
    registries: &Registries,
) -> Result<()> {
    let (name, namespace) = meta_name_namespace(&desired.metadata)?;
    let api: KubeApi<StatefulSet> = KubeApi::namespaced(client, &namespace);

    if opts.force_restart {
        let mut shutdown = desired.clone();
        if let Some(spec) = shutdown.spec.as_mut() {
            spec.replicas = Some(0);
        }
        apply_or_recreate(&api, &name, &shutdown, opts.force_recreate).await?;
    }

    match apply_or_recreate(&api, &name, desired, opts.force_recreate).await {
        Ok(sts) => {
            registries.reconciled.register(
                ObjectKind::StatefulSet,
                &namespace,
                &name,
                sts.metadata.resource_version,
            );
            Ok(())
        }
        Err(Error::CrudIgnore) => Ok(()),
        Err(e) if e.is_unrecoverable() => {
            registries
                .failed
                .register(ObjectKind::StatefulSet, &namespace, &name, None);
            Err(Error::CrudAbort(format!(
                "unrecoverable error reconciling stateful set {namespace}/{name}: {e}"
            )))
        }
        Err(e) => {
            registries
                .failed
                .register(ObjectKind::StatefulSet, &namespace, &name, None);
            Err(e)
        }
    }
}

#[cfg(test)]
mod test {
    use http::{Request, Response};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::client::Body;
    use kube::Client;
    use serde_json::json;

    use super::*;

    fn desired_sts() -> StatefulSet {
        StatefulSet {
            metadata: ObjectMeta {
                name: Some("chi-test-0-0".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn not_found_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "status": "Failure",
            "message": "statefulsets.apps \"chi-test-0-0\" not found",
            "reason": "NotFound",
            "code": 404,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn missing_stateful_set_is_created() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        let registries = Registries::new();
        let desired = desired_sts();

        let server = tokio::spawn(async move {
            let (req, send) = handle.next_request().await.expect("get not called");
            assert_eq!(req.method(), http::Method::GET);
            send.send_response(Response::builder().body(Body::from(not_found_body())).unwrap());

            let (req, send) = handle.next_request().await.expect("create not called");
            assert_eq!(req.method(), http::Method::POST);
            let body = serde_json::to_vec(&desired_sts()).unwrap();
            send.send_response(Response::builder().body(Body::from(body)).unwrap());
        });

        let result = reconcile_host_stateful_set(client, &desired, ReconcileStatefulSetOpts::default(), &registries).await;
        assert!(result.is_ok());
        tokio::time::timeout(std::time::Duration::from_secs(1), server)
            .await
            .expect("server task timed out")
            .unwrap();
    }

    #[tokio::test]
    async fn conflicting_apply_is_ignored_not_failed() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        let registries = Registries::new();
        let desired = desired_sts();

        let server = tokio::spawn(async move {
            let (req, send) = handle.next_request().await.expect("get not called");
            assert_eq!(req.method(), http::Method::GET);
            let existing = serde_json::to_vec(&desired_sts()).unwrap();
            send.send_response(Response::builder().body(Body::from(existing)).unwrap());

            let (req, send) = handle.next_request().await.expect("apply not called");
            assert_eq!(req.method(), http::Method::PATCH);
            let conflict = serde_json::to_vec(&json!({
                "status": "Failure",
                "message": "Operation cannot be fulfilled: the object has been modified",
                "reason": "Conflict",
                "code": 409,
            }))
            .unwrap();
            send.send_response(Response::builder().status(409).body(Body::from(conflict)).unwrap());
        });

        let result = reconcile_host_stateful_set(client, &desired, ReconcileStatefulSetOpts::default(), &registries).await;
        assert!(result.is_ok(), "conflict must collapse to Ok, got {result:?}");
        tokio::time::timeout(std::time::Duration::from_secs(1), server)
            .await
            .expect("server task timed out")
            .unwrap();
    }

    #[tokio::test]
    async fn forbidden_response_escalates_to_crud_abort() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        let registries = Registries::new();
        let desired = desired_sts();

        let server = tokio::spawn(async move {
            let (req, send) = handle.next_request().await.expect("get not called");
            assert_eq!(req.method(), http::Method::GET);
            let existing = serde_json::to_vec(&desired_sts()).unwrap();
            send.send_response(Response::builder().body(Body::from(existing)).unwrap());

            let (req, send) = handle.next_request().await.expect("apply not called");
            assert_eq!(req.method(), http::Method::PATCH);
            let forbidden = serde_json::to_vec(&json!({
                "status": "Failure",
                "message": "statefulsets.apps is forbidden",
                "reason": "Forbidden",
                "code": 403,
            }))
            .unwrap();
            send.send_response(Response::builder().status(403).body(Body::from(forbidden)).unwrap());
        });

        let result = reconcile_host_stateful_set(client, &desired, ReconcileStatefulSetOpts::default(), &registries).await;
        let err = result.expect_err("forbidden apply must fail");
        assert!(err.is_crud_abort(), "expected CrudAbort, got {err:?}");
        tokio::time::timeout(std::time::Duration::from_secs(1), server)
            .await
            .expect("server task timed out")
            .unwrap();
    }
}
