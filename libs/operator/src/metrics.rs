use crate::error::Error;

use kube::ResourceExt;
use opentelemetry::trace::TraceId;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::{
    counter::Counter, exemplar::HistogramWithExemplars, family::Family,
};
use prometheus_client::registry::{Registry, Unit};
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconcile: ReconcileMetrics,
    pub chi: ChiMetrics,
}

impl Metrics {
    /// Registers every metric family into the caller's registry (shared
    /// with `chop_k8s_util::client::new_client_with_metrics`'s HTTP metrics
    /// so `/metrics` exposes one combined text dump).
    pub fn new(registry: &mut Registry) -> Self {
        Self {
            reconcile: ReconcileMetrics::default().register(registry),
            chi: ChiMetrics::default().register(registry),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(&mut Registry::default())
    }
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct TraceLabel {
    pub id: String,
}
impl TryFrom<&TraceId> for TraceLabel {
    type Error = Error;

    fn try_from(id: &TraceId) -> Result<TraceLabel, Self::Error> {
        if std::matches!(id, &TraceId::INVALID) {
            Err(Error::InvalidTraceId)
        } else {
            let trace_id = id.to_string();
            Ok(Self { id: trace_id })
        }
    }
}

#[derive(Clone)]
pub struct ReconcileMetrics {
    pub runs: Family<(), Counter>,
    pub failures: Family<ErrorLabels, Counter>,
    pub duration: HistogramWithExemplars<TraceLabel>,
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self {
            runs: Family::<(), Counter>::default(),
            failures: Family::<ErrorLabels, Counter>::default(),
            duration: HistogramWithExemplars::new([0.1, 0.5, 1., 5., 10.].into_iter()),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub instance: String,
    pub error: String,
}

impl ReconcileMetrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, r: &mut Registry) -> Self {
        r.register_with_unit(
            "duration",
            "reconcile duration",
            Unit::Seconds,
            self.duration.clone(),
        );
        r.register("failures", "reconciliation errors", self.failures.clone());
        r.register("runs", "reconciliations", self.runs.clone());
        self
    }

    pub fn set_failure<K: ResourceExt>(&self, obj: &Arc<K>, e: &Error) {
        self.failures
            .get_or_create(&ErrorLabels {
                instance: obj.name_any(),
                error: e.metric_label(),
            })
            .inc();
    }

    pub fn count_and_measure(&self, trace_id: &TraceId) -> ReconcileMeasurer {
        self.runs.get_or_create(&()).inc();
        ReconcileMeasurer {
            start: Instant::now(),
            labels: trace_id.try_into().ok(),
            metric: self.duration.clone(),
        }
    }
}

/// CHI/host counters, in the same `Family`/`Counter`/`Histogram` idiom as
/// `ReconcileMetrics` but scoped to the reconciliation core's own named
/// events rather than the generic controller-loop runs.
#[derive(Clone)]
pub struct ChiMetrics {
    pub chi_reconciles_started: Family<(), Counter>,
    pub chi_reconciles_completed: Family<(), Counter>,
    pub chi_reconciles_aborted: Family<(), Counter>,
    pub host_reconciles_errors: Family<(), Counter>,
    pub shard_cohort_size: HistogramWithExemplars<TraceLabel>,
}

impl Default for ChiMetrics {
    fn default() -> Self {
        Self {
            chi_reconciles_started: Family::<(), Counter>::default(),
            chi_reconciles_completed: Family::<(), Counter>::default(),
            chi_reconciles_aborted: Family::<(), Counter>::default(),
            host_reconciles_errors: Family::<(), Counter>::default(),
            shard_cohort_size: HistogramWithExemplars::new(
                [1., 2., 4., 8., 16., 32.].into_iter(),
            ),
        }
    }
}

impl ChiMetrics {
    pub fn register(self, r: &mut Registry) -> Self {
        r.register(
            "chi_reconciles_started",
            "CHI reconcile passes started",
            self.chi_reconciles_started.clone(),
        );
        r.register(
            "chi_reconciles_completed",
            "CHI reconcile passes completed successfully",
            self.chi_reconciles_completed.clone(),
        );
        r.register(
            "chi_reconciles_aborted",
            "CHI reconcile passes aborted by ErrCRUDAbort",
            self.chi_reconciles_aborted.clone(),
        );
        r.register(
            "host_reconciles_errors",
            "host reconcile steps that returned a non-ignored error",
            self.host_reconciles_errors.clone(),
        );
        r.register(
            "shard_cohort_size",
            "number of shards processed per concurrent cohort",
            self.shard_cohort_size.clone(),
        );
        self
    }

    pub fn reconcile_started(&self) {
        self.chi_reconciles_started.get_or_create(&()).inc();
    }

    pub fn reconcile_completed(&self) {
        self.chi_reconciles_completed.get_or_create(&()).inc();
    }

    pub fn reconcile_aborted(&self) {
        self.chi_reconciles_aborted.get_or_create(&()).inc();
    }

    pub fn host_reconcile_error(&self) {
        self.host_reconciles_errors.get_or_create(&()).inc();
    }

    pub fn observe_shard_cohort_size(&self, size: usize) {
        self.shard_cohort_size.observe(size as f64, None);
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    labels: Option<TraceLabel>,
    metric: HistogramWithExemplars<TraceLabel>,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        let labels = self.labels.take();
        self.metric.observe(duration, labels);
    }
}
