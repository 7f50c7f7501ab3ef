//! Object Factory contract: given a kind and contextual arguments, produce
//! a fully populated desired object, or `None` meaning "omit; not an
//! error".
//!
//! The actual template logic (pod specs, volume claim templates, container
//! images, users.xml rendering, …) is out of scope for this crate; this
//! module only carries the dispatch surface and a minimal default
//! implementation so the core is runnable end to end without a bespoke
//! builder.
use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, PodSpec, PodTemplateSpec, Secret, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use crate::model::{Chi, Cluster, Host, HostReconcileAttributes};

/// Kinds the factory can be asked to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    ServiceCR,
    ServiceCluster,
    ServiceShard,
    ServiceHost,
    ConfigMapCommon,
    ConfigMapUsers,
    ConfigMapHost,
    ClusterAutoSecret,
    Pdb,
    StatefulSetHost,
}

/// Produced object, tagged by kind.
pub enum DesiredObject {
    ConfigMap(ConfigMap),
    Service(Service),
    Secret(Secret),
    Pdb(PodDisruptionBudget),
    StatefulSet(StatefulSet),
}

/// Contextual arguments a factory call needs. Not every field is relevant to
/// every kind; callers pass what they have.
pub struct FactoryContext<'a> {
    pub chi: &'a Chi,
    pub cluster: Option<&'a Cluster>,
    pub host: Option<&'a Host>,
    /// `true` on the final-aux pass: common config map options differ
    /// between the preliminary and final passes.
    pub include_runtime_options: bool,
}

pub trait ObjectFactory: Send + Sync {
    fn build(&self, kind: ObjectKind, ctx: &FactoryContext<'_>) -> Option<DesiredObject>;
}

fn app_labels(chi_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("clickhouse.altinity.com/chi".to_owned(), chi_name.to_owned());
    labels.insert(
        "app.kubernetes.io/managed-by".to_owned(),
        "chop-operator".to_owned(),
    );
    labels
}

/// A minimal, dependency-free factory: enough shape to exercise every
/// reconciler in this workspace (names, labels, selectors) without the
/// pod/volume template logic a real object builder owns.
#[derive(Default)]
pub struct DefaultObjectFactory;

impl ObjectFactory for DefaultObjectFactory {
    fn build(&self, kind: ObjectKind, ctx: &FactoryContext<'_>) -> Option<DesiredObject> {
        let chi = ctx.chi;
        let labels = app_labels(&chi.name);

        match kind {
            ObjectKind::ServiceCR => {
                if chi.stopped {
                    return None;
                }
                Some(DesiredObject::Service(Service {
                    metadata: ObjectMeta {
                        name: Some(format!("chi-{}", chi.name)),
                        namespace: Some(chi.namespace.clone()),
                        labels: Some(labels.clone()),
                        ..Default::default()
                    },
                    spec: Some(ServiceSpec {
                        selector: Some(labels),
                        ports: Some(vec![ServicePort {
                            name: Some("tcp".into()),
                            port: 9000,
                            target_port: Some(IntOrString::Int(9000)),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                    status: None,
                }))
            }
            ObjectKind::ServiceCluster => {
                let cluster = ctx.cluster?;
                let mut cluster_labels = labels.clone();
                cluster_labels.insert(
                    "clickhouse.altinity.com/cluster".to_owned(),
                    cluster.name.clone(),
                );
                Some(DesiredObject::Service(Service {
                    metadata: ObjectMeta {
                        name: Some(format!("cluster-{}-{}", chi.name, cluster.name)),
                        namespace: Some(chi.namespace.clone()),
                        labels: Some(cluster_labels.clone()),
                        ..Default::default()
                    },
                    spec: Some(ServiceSpec {
                        selector: Some(cluster_labels),
                        cluster_ip: Some("None".into()),
                        ports: Some(vec![ServicePort {
                            name: Some("tcp".into()),
                            port: 9000,
                            target_port: Some(IntOrString::Int(9000)),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                    status: None,
                }))
            }
            ObjectKind::ServiceShard => None,
            ObjectKind::ServiceHost => {
                let host = ctx.host?;
                let mut host_labels = labels.clone();
                host_labels.insert("clickhouse.altinity.com/replica".to_owned(), host.fq_name());
                Some(DesiredObject::Service(Service {
                    metadata: ObjectMeta {
                        name: Some(format!("chi-{}-{}", chi.name, host.fq_name())),
                        namespace: Some(chi.namespace.clone()),
                        labels: Some(host_labels.clone()),
                        ..Default::default()
                    },
                    spec: Some(ServiceSpec {
                        selector: Some(host_labels),
                        cluster_ip: Some("None".into()),
                        ports: Some(vec![ServicePort {
                            name: Some("tcp".into()),
                            port: 9000,
                            target_port: Some(IntOrString::Int(9000)),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                    status: None,
                }))
            }
            ObjectKind::ConfigMapCommon => Some(DesiredObject::ConfigMap(ConfigMap {
                metadata: ObjectMeta {
                    name: Some(format!("chi-{}-common-configd", chi.name)),
                    namespace: Some(chi.namespace.clone()),
                    labels: Some(labels),
                    ..Default::default()
                },
                data: Some(if ctx.include_runtime_options {
                    BTreeMap::from([("remote_servers.xml".to_owned(), render_remote_servers(chi))])
                } else {
                    BTreeMap::new()
                }),
                ..Default::default()
            })),
            ObjectKind::ConfigMapUsers => Some(DesiredObject::ConfigMap(ConfigMap {
                metadata: ObjectMeta {
                    name: Some(format!("chi-{}-users", chi.name)),
                    namespace: Some(chi.namespace.clone()),
                    labels: Some(labels),
                    ..Default::default()
                },
                data: Some(BTreeMap::new()),
                ..Default::default()
            })),
            ObjectKind::ConfigMapHost => {
                let host = ctx.host?;
                Some(DesiredObject::ConfigMap(ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(format!("chi-{}-deploy-confd-{}", chi.name, host.fq_name())),
                        namespace: Some(chi.namespace.clone()),
                        labels: Some(labels),
                        ..Default::default()
                    },
                    data: Some(BTreeMap::new()),
                    ..Default::default()
                }))
            }
            ObjectKind::ClusterAutoSecret => {
                let cluster = ctx.cluster?;
                if cluster.secret_source != crate::model::SecretSource::Auto {
                    return None;
                }
                Some(DesiredObject::Secret(Secret {
                    metadata: ObjectMeta {
                        name: Some(format!("chi-{}-{}-secret", chi.name, cluster.name)),
                        namespace: Some(chi.namespace.clone()),
                        labels: Some(labels),
                        ..Default::default()
                    },
                    string_data: Some(BTreeMap::from([(
                        "secret".to_owned(),
                        uuid_like_secret(chi, cluster),
                    )])),
                    ..Default::default()
                }))
            }
            ObjectKind::Pdb => {
                let cluster = ctx.cluster?;
                let mut cluster_labels = labels;
                cluster_labels.insert(
                    "clickhouse.altinity.com/cluster".to_owned(),
                    cluster.name.clone(),
                );
                Some(DesiredObject::Pdb(PodDisruptionBudget {
                    metadata: ObjectMeta {
                        name: Some(format!("chi-{}-{}-pdb", chi.name, cluster.name)),
                        namespace: Some(chi.namespace.clone()),
                        labels: Some(cluster_labels.clone()),
                        ..Default::default()
                    },
                    spec: Some(PodDisruptionBudgetSpec {
                        max_unavailable: Some(IntOrString::Int(1)),
                        selector: Some(LabelSelector {
                            match_labels: Some(cluster_labels),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    status: None,
                }))
            }
            ObjectKind::StatefulSetHost => {
                let host = ctx.host?;
                let mut host_labels = labels;
                host_labels.insert("clickhouse.altinity.com/replica".to_owned(), host.fq_name());
                let replicas = if chi.stopped || host.reconcile_attributes.contains(HostReconcileAttributes::STOPPED) {
                    0
                } else {
                    1
                };
                Some(DesiredObject::StatefulSet(StatefulSet {
                    metadata: ObjectMeta {
                        name: Some(format!("chi-{}-{}", chi.name, host.fq_name())),
                        namespace: Some(chi.namespace.clone()),
                        labels: Some(host_labels.clone()),
                        ..Default::default()
                    },
                    spec: Some(StatefulSetSpec {
                        replicas: Some(replicas),
                        service_name: format!("chi-{}-{}", chi.name, host.fq_name()),
                        selector: LabelSelector {
                            match_labels: Some(host_labels.clone()),
                            ..Default::default()
                        },
                        template: PodTemplateSpec {
                            metadata: Some(ObjectMeta {
                                labels: Some(host_labels),
                                ..Default::default()
                            }),
                            spec: Some(PodSpec {
                                containers: vec![Container {
                                    name: "clickhouse".to_owned(),
                                    image: Some("clickhouse/clickhouse-server:latest".to_owned()),
                                    ..Default::default()
                                }],
                                ..Default::default()
                            }),
                        },
                        ..Default::default()
                    }),
                    status: None,
                }))
            }
        }
    }
}

fn render_remote_servers(chi: &Chi) -> String {
    format!("<clickhouse><!-- {} clusters --></clickhouse>", chi.clusters.len())
}

fn uuid_like_secret(chi: &Chi, cluster: &Cluster) -> String {
    format!("{}-{}-auto-secret", chi.name, cluster.name)
}
