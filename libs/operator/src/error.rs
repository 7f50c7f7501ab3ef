use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All errors possible to occur during CHI reconciliation.
///
/// `CrudIgnore` and `CrudAbort` are sentinel variants: callers pattern-match
/// on the tag rather than comparing by value.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any error originating from the `kube-rs` crate.
    #[error("Kubernetes reported error: {0}")]
    KubeError(#[from] kube::Error),

    /// A sub-reconciler chose to skip the mutation it was about to perform.
    /// Callers treat this as success.
    #[error("CRUD step ignored")]
    CrudIgnore,

    /// A hard stop that must bubble all the way to the top reconciler and
    /// increment the aborted-reconciles counter.
    #[error("CRUD step aborted: {0}")]
    CrudAbort(String),

    /// Storage reconciliation detected that a host's PVC no longer matches
    /// any live replica and data would be lost by a naive recreate.
    #[error("data loss detected for host {0}")]
    DataLoss(String),

    /// The CHI resource (or a nested reference to it) is missing a field the
    /// core requires to proceed, such as a namespace.
    #[error("invalid ClickHouseInstallation: {0}")]
    UserInputError(String),

    /// `Schemer::host_clickhouse_version` failed; best-effort, never fatal,
    /// but callers want a typed error to log.
    #[error("failed to query")]
    VersionProbeFailed,

    /// The self-labeling bootstrap could not find or update one of the
    /// Pod/ReplicaSet/Deployment tree members.
    #[error("self-labeling failed: missing {resource} {name}")]
    SelfLabelMissingOwner { resource: &'static str, name: String },

    /// Environment variables required for self-labeling are not set.
    #[error("self-labeling requires {0} to be set")]
    SelfLabelEnvMissing(&'static str),

    /// The current tracing span has no valid OpenTelemetry trace id attached
    /// (metrics exemplars are best-effort; this is never fatal to a caller).
    #[error("no valid trace id in current span")]
    InvalidTraceId,
}

impl Error {
    /// Stable, low-cardinality label for the failures metric.
    pub fn metric_label(&self) -> String {
        match self {
            Error::KubeError(_) => "kube".to_owned(),
            Error::CrudIgnore => "crud_ignore".to_owned(),
            Error::CrudAbort(_) => "crud_abort".to_owned(),
            Error::DataLoss(_) => "data_loss".to_owned(),
            Error::UserInputError(_) => "user_input".to_owned(),
            Error::VersionProbeFailed => "version_probe".to_owned(),
            Error::SelfLabelMissingOwner { .. } => "selflabel_missing_owner".to_owned(),
            Error::SelfLabelEnvMissing(_) => "selflabel_env_missing".to_owned(),
            Error::InvalidTraceId => "invalid_trace_id".to_owned(),
        }
    }

    /// True for the `CrudAbort` sentinel: the only error kind that must
    /// bump `CHIReconcilesAborted` at the top reconciler.
    pub fn is_crud_abort(&self) -> bool {
        matches!(self, Error::CrudAbort(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(&self, Error::KubeError(kube::Error::Api(e)) if e.code == 404)
    }

    /// A 409 from a server-side apply: another writer raced this one for the
    /// same object. Benign — the next reconcile pass will see the result.
    pub fn is_conflict(&self) -> bool {
        matches!(&self, Error::KubeError(kube::Error::Api(e)) if e.code == 409)
    }

    /// 403/422 from the API server: retrying without the user fixing the CHI
    /// spec or RBAC cannot succeed, so this pass gives up on the host rather
    /// than retrying the same doomed request next time too.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(&self, Error::KubeError(kube::Error::Api(e)) if e.code == 403 || e.code == 422)
    }
}

/// Helper used throughout the per-object reconcilers: collapses any
/// `Error` that wraps a 404 into `None`, propagating everything else.
pub fn ignore_not_found<T>(res: Result<T>) -> Result<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Used by status updates that want a stable, serializable timestamp.
pub fn now_time() -> Time {
    Time(chrono::Utc::now())
}
