//! Single-pod PostgreSQL databases
//!
//! Used as the SQL storage backend and, with other names, by the backup /
//! restore and converters scenarios.

use crate::context::aggregate_failures;
use crate::error::{Error, Result};
use crate::k8s;
use crate::suite::SuiteContext;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, ExecAction, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, PodTemplateSpec, Probe, Service, ServicePort,
    ServiceSpec, TCPSocketAction, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, ListParams, ObjectMeta, PostParams};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

pub const POSTGRES_PORT: i32 = 5432;
pub const POSTGRES_IMAGE: &str = "quay.io/debezium/postgres:12";
pub const OPENSHIFT_POSTGRES_IMAGE: &str = "quay.io/debezium/example-postgres-ocp:latest";
const VOLUME_SIZE: &str = "300Mi";
const READY_TIMEOUT: Duration = Duration::from_secs(180);

/// Connection details of a deployed database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbData {
    pub name: String,
    /// Service cluster IP
    pub host: String,
    pub port: i32,
    pub database: String,
    pub user: String,
    pub password: String,
    pub data_source_url: String,
}

impl DbData {
    pub fn new(name: &str, host: &str, database: &str, user: &str, password: &str) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            port: POSTGRES_PORT,
            database: database.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            data_source_url: format!("jdbc:postgresql://{}:{}/{}", host, POSTGRES_PORT, database),
        }
    }
}

fn labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), name.to_string())])
}

fn metadata(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels(name)),
        ..Default::default()
    }
}

fn env(pairs: &[(&str, &str)]) -> Vec<EnvVar> {
    pairs
        .iter()
        .map(|(k, v)| EnvVar {
            name: k.to_string(),
            value: Some(v.to_string()),
            ..Default::default()
        })
        .collect()
}

fn tcp_probe(initial_delay: i32, period: i32) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(POSTGRES_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        ..Default::default()
    }
}

/// Database Deployment
///
/// OpenShift uses an image that runs as an arbitrary uid and has no
/// volume; elsewhere the data lives on the claim of the same name.
pub fn postgres_deployment(
    namespace: &str,
    name: &str,
    database: &str,
    user: &str,
    password: &str,
    is_openshift: bool,
) -> Deployment {
    let port = ContainerPort {
        container_port: POSTGRES_PORT,
        name: Some("postgresql".to_string()),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    };

    let (container, volumes) = if is_openshift {
        let check = format!(
            "PGPASSWORD={} /usr/bin/psql -w -U {} -d {} -c 'SELECT 1'",
            password, user, database
        );
        let container = Container {
            name: name.to_string(),
            image: Some(OPENSHIFT_POSTGRES_IMAGE.to_string()),
            image_pull_policy: Some("Always".to_string()),
            env: Some(env(&[
                ("POSTGRESQL_DATABASE", database),
                ("POSTGRESQL_PASSWORD", password),
                ("POSTGRESQL_USER", user),
            ])),
            ports: Some(vec![port]),
            readiness_probe: Some(Probe {
                exec: Some(ExecAction {
                    command: Some(vec!["/bin/sh".to_string(), "-i".to_string(), "-c".to_string(), check]),
                }),
                initial_delay_seconds: Some(5),
                timeout_seconds: Some(1),
                ..Default::default()
            }),
            liveness_probe: Some(tcp_probe(30, 10)),
            ..Default::default()
        };
        (container, None)
    } else {
        let container = Container {
            name: name.to_string(),
            image: Some(POSTGRES_IMAGE.to_string()),
            env: Some(env(&[
                ("POSTGRES_DB", database),
                ("POSTGRES_PASSWORD", password),
                ("POSTGRES_USER", user),
            ])),
            ports: Some(vec![port]),
            readiness_probe: Some(tcp_probe(5, 10)),
            liveness_probe: Some(tcp_probe(15, 20)),
            volume_mounts: Some(vec![VolumeMount {
                mount_path: "/var/lib/postgresql/data".to_string(),
                name: name.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let volumes = vec![Volume {
            name: name.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: name.to_string(),
                read_only: None,
            }),
            ..Default::default()
        }];
        (container, Some(volumes))
    };

    Deployment {
        metadata: metadata(namespace, name),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels(name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn postgres_service(namespace: &str, name: &str) -> Service {
    Service {
        metadata: metadata(namespace, name),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port: POSTGRES_PORT,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(POSTGRES_PORT)),
                ..Default::default()
            }]),
            selector: Some(labels(name)),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn postgres_volume_claim(namespace: &str, name: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: metadata(namespace, name),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(VOLUME_SIZE.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Deploy a database and wait for it to accept connections
pub async fn deploy_postgresql_database(
    suite: &SuiteContext,
    namespace: &str,
    name: &str,
    database: &str,
    user: &str,
    password: &str,
) -> Result<DbData> {
    info!(database = %name, namespace = %namespace, "Deploying postgresql database");
    let pp = PostParams::default();

    let claims: Api<PersistentVolumeClaim> = Api::namespaced(suite.client.clone(), namespace);
    claims.create(&pp, &postgres_volume_claim(namespace, name)).await?;

    let deployments: Api<Deployment> = Api::namespaced(suite.client.clone(), namespace);
    let deployment = postgres_deployment(namespace, name, database, user, password, suite.is_openshift);
    deployments.create(&pp, &deployment).await?;

    let services: Api<Service> = Api::namespaced(suite.client.clone(), namespace);
    services.create(&pp, &postgres_service(namespace, name)).await?;

    k8s::wait_for_deployment_ready(&suite.client, &suite.cli, namespace, name, 1, READY_TIMEOUT).await?;
    suite.cli.get_pods(namespace).await.ok();

    let service = services.get(name).await?;
    let host = service
        .spec
        .and_then(|s| s.cluster_ip)
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| Error::MissingField(format!("service {}/{} clusterIP", namespace, name)))?;

    Ok(DbData::new(name, &host, database, user, password))
}

/// Name of the (first) pod backing a database
pub async fn postgres_pod(suite: &SuiteContext, namespace: &str, name: &str) -> Result<String> {
    let pods: Api<Pod> = Api::namespaced(suite.client.clone(), namespace);
    let list = pods
        .list(&ListParams::default().labels(&format!("app={}", name)))
        .await?;
    list.items
        .into_iter()
        .find_map(|p| p.metadata.name)
        .ok_or_else(|| Error::MissingField(format!("pod for database {}/{}", namespace, name)))
}

/// Delete a database's Deployment, Service and claim, waiting for each
pub async fn remove_postgresql_database(suite: &SuiteContext, namespace: &str, name: &str) -> Result<()> {
    info!(database = %name, namespace = %namespace, "Removing postgresql database");

    let deployments: Api<Deployment> = Api::namespaced(suite.client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(suite.client.clone(), namespace);
    let claims: Api<PersistentVolumeClaim> = Api::namespaced(suite.client.clone(), namespace);
    let steps = vec![
        (
            format!("delete deployment {}", name),
            k8s::delete_and_wait(&deployments, "deployment", name).await,
        ),
        (
            format!("delete service {}", name),
            k8s::delete_and_wait(&services, "service", name).await,
        ),
        (
            format!("delete pvc {}", name),
            k8s::delete_and_wait(&claims, "pvc", name).await,
        ),
    ];

    suite.cli.get_pods(namespace).await.ok();
    aggregate_failures(steps)
}
