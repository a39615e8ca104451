//! Kafka clusters managed through the Strimzi operator
//!
//! A cluster is described by a `KafkaClusterRequest` and, once deployed, by
//! a `KafkaClusterInfo`. The info owns the broker operator installation if
//! this deployment created it: `remove_kafka_cluster` takes that ownership
//! out, so the operator is removed at most once no matter how many times
//! removal is attempted.

pub mod certs;
pub mod consumer;
pub mod manifests;
pub mod operator;

pub use consumer::{await_records, spawn_consumer, ConsumeRequest};
pub use operator::StrimziInstallation;

use crate::context::aggregate_failures;
use crate::error::Result;
use crate::k8s;
use crate::suite::SuiteContext;
use crate::wait::Poller;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{Api, ListParams};
use kube::core::DynamicObject;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

const ENTITY_OPERATOR_TIMEOUT: Duration = Duration::from_secs(600);
const CLUSTER_CA_TIMEOUT: Duration = Duration::from_secs(60);
const CLUSTER_REMOVED_TIMEOUT: Duration = Duration::from_secs(120);

/// User created for secured clusters
pub const SECURED_USER: &str = "registry-user-secured";

/// Client authentication on the TLS listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KafkaAuth {
    Tls,
    Scram,
}

impl KafkaAuth {
    /// Listener / KafkaUser authentication type
    pub fn strimzi_type(&self) -> &'static str {
        match self {
            KafkaAuth::Tls => "tls",
            KafkaAuth::Scram => "scram-sha-512",
        }
    }
}

impl fmt::Display for KafkaAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KafkaAuth::Tls => "tls",
            KafkaAuth::Scram => "scram",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaClusterRequest {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub topics: Vec<String>,
    pub auth: Option<KafkaAuth>,
    /// Expose a TLS bootstrap outside the cluster
    pub external: bool,
}

impl KafkaClusterRequest {
    /// Single broker, externally reachable, no topics
    pub fn shared(namespace: &str) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            name: format!("shared-kafka-{}", &id[..5]),
            namespace: namespace.to_string(),
            replicas: 1,
            topics: Vec::new(),
            auth: None,
            external: true,
        }
    }

    pub fn bootstrap_servers(&self) -> String {
        let port = if self.auth.is_some() {
            manifests::TLS_PORT
        } else {
            manifests::PLAIN_PORT
        };
        format!("{}-kafka-bootstrap.{}:{}", self.name, self.namespace, port)
    }

    /// Every Strimzi object this request creates
    pub fn manifests(&self, is_openshift: bool) -> Vec<Value> {
        let mut docs = vec![manifests::kafka_cluster(self, is_openshift)];
        docs.extend(
            self.topics
                .iter()
                .map(|t| manifests::kafka_topic(&self.name, &self.namespace, t, self.replicas)),
        );
        if let Some(auth) = self.auth {
            docs.push(manifests::kafka_user(&self.name, &self.namespace, SECURED_USER, auth));
        }
        docs
    }
}

/// A deployed cluster
///
/// Not `Clone`: `operator` is an ownership token. Use `borrowed` to hand
/// the cluster to someone who must not remove the operator.
#[derive(Debug, PartialEq, Eq)]
pub struct KafkaClusterInfo {
    pub name: String,
    pub namespace: String,
    /// Set when this deployment installed the broker operator
    pub operator: Option<StrimziInstallation>,
    pub bootstrap_servers: String,
    pub external_bootstrap_servers: Option<String>,
    pub topics: Vec<String>,
    pub auth: Option<KafkaAuth>,
    pub user: Option<String>,
}

impl KafkaClusterInfo {
    pub fn new(req: &KafkaClusterRequest, operator: Option<StrimziInstallation>) -> Self {
        Self {
            name: req.name.clone(),
            namespace: req.namespace.clone(),
            operator,
            bootstrap_servers: req.bootstrap_servers(),
            external_bootstrap_servers: None,
            topics: req.topics.clone(),
            auth: req.auth,
            user: req.auth.map(|_| SECURED_USER.to_string()),
        }
    }

    pub fn strimzi_deployed(&self) -> bool {
        self.operator.is_some()
    }

    /// Same cluster without the operator ownership
    pub fn borrowed(&self) -> Self {
        Self {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            operator: None,
            bootstrap_servers: self.bootstrap_servers.clone(),
            external_bootstrap_servers: self.external_bootstrap_servers.clone(),
            topics: self.topics.clone(),
            auth: self.auth,
            user: self.user.clone(),
        }
    }

    /// Hand the operator installation to the caller, leaving none behind
    pub fn take_operator(&mut self) -> Option<StrimziInstallation> {
        self.operator.take()
    }
}

/// Deploy the broker operator (if missing), the cluster, its topics and user
///
/// A failure after the operator was installed removes what was created
/// before returning the error.
pub async fn deploy_kafka_cluster(suite: &SuiteContext, req: &KafkaClusterRequest) -> Result<KafkaClusterInfo> {
    let operator = operator::ensure_strimzi_operator(suite, &req.namespace).await?;
    let mut info = KafkaClusterInfo::new(req, operator);

    if let Err(e) = create_cluster(suite, req, &mut info).await {
        warn!(cluster = %req.name, error = %e, "Kafka cluster deployment failed, removing it");
        if let Err(removal) = remove_kafka_cluster(suite, &mut info).await {
            error!(cluster = %req.name, error = %removal, "Failed to remove kafka cluster");
        }
        return Err(e);
    }
    Ok(info)
}

async fn create_cluster(suite: &SuiteContext, req: &KafkaClusterRequest, info: &mut KafkaClusterInfo) -> Result<()> {
    info!(
        cluster = %req.name,
        namespace = %req.namespace,
        replicas = req.replicas,
        auth = ?req.auth,
        external = req.external,
        "Deploying kafka cluster"
    );
    suite
        .cli
        .apply_manifest(&req.namespace, &req.manifests(suite.is_openshift))
        .await?;

    let entity_operator = format!("{}-entity-operator", req.name);
    let ready = k8s::wait_for_deployment_ready(
        &suite.client,
        &suite.cli,
        &req.namespace,
        &entity_operator,
        1,
        ENTITY_OPERATOR_TIMEOUT,
    )
    .await;
    if ready.is_err() {
        suite.cli.get_volumes(&req.namespace).await.ok();
    }
    ready?;

    if req.auth.is_some() {
        let secrets: Api<Secret> = Api::namespaced(suite.client.clone(), &req.namespace);
        let ca = format!("{}-cluster-ca-cert", req.name);
        let found = Poller::new(CLUSTER_CA_TIMEOUT)
            .until_present(&format!("secret {}/{}", req.namespace, ca), &secrets, &ca)
            .await;
        suite
            .cli
            .execute(&["get", "secret", "-n", &req.namespace])
            .await
            .ok();
        found?;
    }

    if req.external {
        info.external_bootstrap_servers = Some(external_bootstrap(suite, req).await?);
    }
    Ok(())
}

async fn external_bootstrap(suite: &SuiteContext, req: &KafkaClusterRequest) -> Result<String> {
    if !suite.is_openshift {
        return Ok(format!("{}:443", manifests::BOOTSTRAP_HOST));
    }
    let routes: Api<DynamicObject> =
        Api::namespaced_with(suite.client.clone(), &req.namespace, &k8s::route_resource());
    let route = routes.get(&format!("{}-kafka-bootstrap", req.name)).await?;
    let host = crate::registry::route_host(&route).ok_or_else(|| {
        crate::error::Error::MissingField(format!("{}-kafka-bootstrap route ingress host", req.name))
    })?;
    Ok(format!("{}:443", host))
}

/// Delete the cluster, its topics and user, then the operator if owned
///
/// Every step is attempted. The operator is taken out of `info` even when
/// an earlier step failed, so it is removed at most once.
pub async fn remove_kafka_cluster(suite: &SuiteContext, info: &mut KafkaClusterInfo) -> Result<()> {
    let ns = info.namespace.clone();
    info!(cluster = %info.name, namespace = %ns, "Removing kafka cluster");

    let mut steps = Vec::new();
    let cluster_deleted = suite
        .cli
        .execute(&["delete", "--ignore-not-found", "kafka", &info.name, "-n", &ns])
        .await;
    let cluster_delete_failed = cluster_deleted.is_err();
    steps.push((format!("delete kafka {}", info.name), cluster_deleted));

    for topic in &info.topics {
        let deleted = suite
            .cli
            .execute(&["delete", "--ignore-not-found", "kafkatopic", topic, "-n", &ns])
            .await;
        steps.push((format!("delete kafkatopic {}", topic), deleted));
    }
    if let Some(user) = &info.user {
        let deleted = suite
            .cli
            .execute(&["delete", "--ignore-not-found", "kafkauser", user, "-n", &ns])
            .await;
        steps.push((format!("delete kafkauser {}", user), deleted));
    }

    // Pods never go away if the Kafka object is still there
    if !cluster_delete_failed {
        let pods: Api<Pod> = Api::namespaced(suite.client.clone(), &ns);
        let selector = format!("strimzi.io/cluster={}", info.name);
        let gone = Poller::new(CLUSTER_REMOVED_TIMEOUT)
            .until(&format!("kafka cluster {} pods removal", info.name), || {
                let pods = pods.clone();
                let selector = selector.clone();
                async move {
                    match pods.list(&ListParams::default().labels(&selector)).await {
                        Ok(list) => Ok(list.items.is_empty()),
                        Err(e) if crate::error::is_not_found(&e) => Ok(true),
                        Err(e) => Err(e.into()),
                    }
                }
            })
            .await;
        let gone = k8s::surface_with_diagnostics(&suite.cli, &ns, gone).await;
        steps.push((format!("kafka cluster {} pods removal", info.name), gone));
    }

    if let Some(installation) = info.take_operator() {
        let removed = operator::remove_strimzi_operator(suite, installation).await;
        steps.push(("remove strimzi operator".to_string(), removed));
    }
    aggregate_failures(steps)
}

#[cfg(test)]
#[path = "kafka_test.rs"]
mod tests;
