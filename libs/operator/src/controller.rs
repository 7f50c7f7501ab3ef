//! Wires a `kube::runtime::Controller` over `ClickHouseInstallation` to the
//! top reconciler (`chi::reconcile_chi`), with a `Context`/`State`/`run`
//! shape carrying the CHI collaborators (object factory, schemer,
//! Zookeeper path manager, ancestor store).
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
};
use prometheus_client::registry::Registry;
use serde::Serialize;
use tokio::{sync::RwLock, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::ancestor::AncestorStore;
use crate::chi;
use crate::config::OperatorConfig;
use crate::crd::chi::ClickHouseInstallation;
use crate::error::{Error, Result};
use crate::factory::{DefaultObjectFactory, ObjectFactory};
use crate::metrics::Metrics;
use crate::schemer::{NullSchemer, Schemer};
use crate::telemetry;
use crate::zookeeper::{NoopZookeeperPathManager, ZookeeperPathManager};

/// Context injected with each `reconcile` and `error_policy` invocation.
pub struct Context {
    pub client: Client,
    pub metrics: Arc<Metrics>,
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    pub config: OperatorConfig,
    pub ancestors: Arc<AncestorStore>,
    pub factory: Arc<dyn ObjectFactory>,
    pub schemer: Arc<dyn Schemer>,
    pub zookeeper: Arc<dyn ZookeeperPathManager>,
    /// Cancelled on process shutdown; checked at the top of every
    /// non-trivial reconcile step so a cancelled pass returns early instead
    /// of starting work a shutdown would only have to interrupt partway.
    pub cancel: CancellationToken,
}

#[instrument(skip(ctx, chi), fields(trace_id))]
async fn reconcile(chi: Arc<ClickHouseInstallation>, ctx: Arc<Context>) -> Result<Action, Error> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));

    let _timer = ctx.metrics.reconcile.count_and_measure(&trace_id);
    ctx.diagnostics.write().await.last_event = Utc::now();
    ctx.metrics.chi.reconcile_started();

    match chi::reconcile_chi(chi, ctx.clone()).await {
        Ok(()) => {
            ctx.metrics.chi.reconcile_completed();
            Ok(Action::requeue(Duration::from_secs(300)))
        }
        Err(e) => {
            if e.is_crud_abort() {
                ctx.metrics.chi.reconcile_aborted();
            }
            Err(e)
        }
    }
}

fn error_policy(chi: Arc<ClickHouseInstallation>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile.set_failure(&chi, error);
    Action::requeue(Duration::from_secs(5 * 60))
}

/// Diagnostics read by the web server.
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
        }
    }
}

/// State shared between the controller and the web server.
#[derive(Clone)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: Arc<Metrics>,
    registry: Arc<Registry>,
    ancestors: Arc<AncestorStore>,
    cancel: CancellationToken,
}

impl State {
    /// Takes ownership of the process-wide registry (already carrying the
    /// Kube client's HTTP metrics, per `new_client_with_metrics`) and
    /// registers the reconcile/CHI metric families into it, so `/metrics`
    /// exposes one combined dump.
    pub fn new(mut registry: Registry) -> Self {
        let metrics = Metrics::new(&mut registry);
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            metrics: Arc::new(metrics),
            registry: Arc::new(registry),
            ancestors: Arc::new(AncestorStore::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn metrics(&self) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry).unwrap();
        buffer
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    fn to_context(&self, client: Client, config: OperatorConfig) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: self.metrics.clone(),
            diagnostics: self.diagnostics.clone(),
            config,
            ancestors: self.ancestors.clone(),
            factory: Arc::new(DefaultObjectFactory),
            schemer: Arc::new(NullSchemer::default()),
            zookeeper: Arc::new(NoopZookeeperPathManager),
            cancel: self.cancel.clone(),
        })
    }
}

/// Initializes the controller and drives it until shutdown.
pub async fn run(state: State, client: Client, operator_config: OperatorConfig) {
    let chis = Api::<ClickHouseInstallation>::all(client.clone());
    if let Err(e) = chis.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }
    trace!("Init controller");

    // `shutdown_on_signal` stops the controller from accepting new work;
    // this token additionally lets in-flight reconcile passes notice the
    // same signal and stop starting further steps of their own.
    let cancel = state.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    Controller::new(chis, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client, operator_config))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[cfg(test)]
impl Context {
    /// A context wired to a `tower-test` mock service instead of a live
    /// cluster, for exercising reconcile code paths against scripted HTTP
    /// responses without a real apiserver.
    pub fn test() -> (Arc<Self>, tower_test::mock::Handle<http::Request<kube::client::Body>, http::Response<kube::client::Body>>)
    {
        let (mock_service, handle) = tower_test::mock::pair();
        let client = Client::new(mock_service, "default");
        let mut registry = Registry::default();
        let ctx = Context {
            client,
            metrics: Arc::new(Metrics::new(&mut registry)),
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            config: OperatorConfig::default(),
            ancestors: Arc::new(AncestorStore::new()),
            factory: Arc::new(DefaultObjectFactory),
            schemer: Arc::new(NullSchemer::default()),
            zookeeper: Arc::new(NoopZookeeperPathManager),
            cancel: CancellationToken::new(),
        };
        (Arc::new(ctx), handle)
    }
}
