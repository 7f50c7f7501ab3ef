/// Enumerated options consumed by the reconciliation core.
///
/// Passed explicitly into the controller/reconciler constructors rather
/// than read from a process-wide global: operator-singleton configuration
/// and version/commit/date constants are process-wide read-mostly state
/// that should be constructed once at startup and threaded through, not
/// read ambiently.
#[derive(Clone, Copy, Debug)]
pub struct OperatorConfig {
    /// `Reconcile.Runtime.ReconcileShardsThreadsNumber` — upper bound on the
    /// number of shards reconciled concurrently within one cohort.
    pub reconcile_shards_threads_number: usize,
    /// `Reconcile.Runtime.ReconcileShardsMaxConcurrencyPercent` — percentage
    /// (1-100) of a cluster's shard count allowed to run concurrently.
    pub reconcile_shards_max_concurrency_percent: u32,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            reconcile_shards_threads_number: 4,
            reconcile_shards_max_concurrency_percent: 50,
        }
    }
}

impl OperatorConfig {
    /// Worker-pool size for a shard cohort.
    ///
    /// `full_fan_out` ⇒ `max(T, 1)`.
    /// otherwise      ⇒ `min(T, max(round((P/100) * shards_count), 1))`.
    ///
    /// Always ≥ 1: `T=0` or `P=0` floors to `workers_num = 1`.
    pub fn workers_num(&self, shards_count: usize, full_fan_out: bool) -> usize {
        let t = self.reconcile_shards_threads_number.max(1);
        if full_fan_out {
            return t;
        }
        let p = self.reconcile_shards_max_concurrency_percent as f64 / 100.0;
        let by_percent = (p * shards_count as f64).round() as usize;
        t.min(by_percent.max(1))
    }
}
