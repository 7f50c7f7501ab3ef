//! Emitted events: `ReconcileStarted`, `ReconcileCompleted`,
//! `ReconcileFailed`, `UpdateFailed`, `ProgressHostsCompleted`. Each carries
//! CHI/host identity and a human message.
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventRecorder, EventSource, EventType, NewEvent};
use kube::{Client, Resource, ResourceExt};

use crate::crd::chi::ClickHouseInstallation;

pub const REASON_RECONCILE_STARTED: &str = "ReconcileStarted";
pub const REASON_RECONCILE_COMPLETED: &str = "ReconcileCompleted";
pub const REASON_RECONCILE_FAILED: &str = "ReconcileFailed";
pub const REASON_UPDATE_FAILED: &str = "UpdateFailed";
pub const REASON_PROGRESS_HOSTS_COMPLETED: &str = "ProgressHostsCompleted";

/// One `EventRecorder` bound to a single CHI's `ObjectReference`, shared by
/// the top reconciler and every nested reconciler for the duration of one
/// reconcile pass.
pub struct ChiEventRecorder {
    recorder: EventRecorder,
}

impl ChiEventRecorder {
    pub fn new(client: Client, chi: &ClickHouseInstallation) -> Self {
        let reference = ObjectReference {
            api_version: Some(ClickHouseInstallation::api_version(&()).to_string()),
            kind: Some(ClickHouseInstallation::kind(&()).to_string()),
            name: Some(chi.name_any()),
            namespace: chi.namespace(),
            uid: chi.uid(),
            resource_version: chi.resource_version(),
            ..Default::default()
        };
        let source = EventSource {
            controller: "chop-operator".to_owned(),
            controller_pod: std::env::var("OPERATOR_POD_NAME").unwrap_or_else(|_| "chop-operator".to_owned()),
        };
        Self {
            recorder: EventRecorder::new(client, source, reference),
        }
    }

    async fn emit(&self, reason: &str, note: String, event_type: EventType) {
        if let Err(e) = self
            .recorder
            .publish(NewEvent {
                action: reason.to_owned(),
                reason: reason.to_owned(),
                note: Some(note),
                event_type,
                secondary_object: None,
            })
            .await
        {
            tracing::warn!(error = %e, reason, "failed to publish event");
        }
    }

    pub async fn reconcile_started(&self, message: impl Into<String>) {
        self.emit(REASON_RECONCILE_STARTED, message.into(), EventType::Normal)
            .await;
    }

    pub async fn reconcile_completed(&self, message: impl Into<String>) {
        self.emit(REASON_RECONCILE_COMPLETED, message.into(), EventType::Normal)
            .await;
    }

    pub async fn reconcile_failed(&self, message: impl Into<String>) {
        self.emit(REASON_RECONCILE_FAILED, message.into(), EventType::Warning)
            .await;
    }

    pub async fn update_failed(&self, message: impl Into<String>) {
        self.emit(REASON_UPDATE_FAILED, message.into(), EventType::Warning)
            .await;
    }

    pub async fn progress_hosts_completed(&self, completed: u32, total: u32) {
        self.emit(
            REASON_PROGRESS_HOSTS_COMPLETED,
            format!("{completed}/{total}"),
            EventType::Normal,
        )
        .await;
    }
}
