use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use chop_k8s_util::client::new_client_with_metrics;
use chop_operator::config::OperatorConfig;
use chop_operator::controller::{self, State};
use chop_operator::selflabel;
use chop_operator::telemetry;

use clap::{crate_authors, crate_description, crate_version, Parser};
use kube::Config;
use prometheus_client::registry::Registry;

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(c.metrics())
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[derive(Parser, Debug)]
#[command(
    name="chop-operator",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Listen on given port
    #[arg(short, long, default_value_t = 8080, env)]
    port: u32,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`. Example: "info,kube=debug,chop_operator=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint.
    ///
    /// This optional argument specifies the URL to which traces will be sent using
    /// OpenTelemetry. If not provided, tracing will be disabled.
    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    ///
    /// Specifies the ratio of traces to sample. A value of `1.0` will sample all traces,
    /// while a lower value will sample fewer traces. The default is `0.1`, meaning 10%
    /// of traces are sampled.
    #[arg(short, long, default_value_t = 0.1, env)]
    sample_ratio: f64,

    /// Number of worker threads used to reconcile shards in parallel within a single CHI.
    #[arg(long, default_value_t = 4, env = "RECONCILE_SHARDS_THREADS_NUMBER")]
    reconcile_shards_threads_number: usize,

    /// Percentage (1-100) of a cluster's shard count allowed to reconcile concurrently.
    #[arg(
        long,
        default_value_t = 50,
        env = "RECONCILE_SHARDS_MAX_CONCURRENCY_PERCENT"
    )]
    reconcile_shards_max_concurrency_percent: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();

    telemetry::init(
        &args.log_filter,
        args.log_format,
        args.tracing_url.as_deref(),
        args.sample_ratio,
    )
    .await?;

    let mut registry = Registry::with_prefix("chop_operator");
    let config = Config::infer().await?;
    let client = new_client_with_metrics(config, &mut registry).await?;

    if let Err(e) = selflabel::run(client.clone()).await {
        // self-labeling never blocks reconciliation; the operator pod may be
        // running outside Kubernetes (local dev) or env vars may be unset.
        tracing::warn!(error = %e, "self-labeling skipped");
    }

    let operator_config = OperatorConfig {
        reconcile_shards_threads_number: args.reconcile_shards_threads_number,
        reconcile_shards_max_concurrency_percent: args.reconcile_shards_max_concurrency_percent,
    };

    let state = State::new(registry);
    let controller = controller::run(state.clone(), client, operator_config);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health)
            .service(metrics)
    })
    .bind(format!("0.0.0.0:{}", args.port))?
    .shutdown_timeout(5);

    // Both runtimes implement graceful shutdown, so poll until both are done
    tokio::join!(controller, server.run()).1?;
    Ok(())
}
