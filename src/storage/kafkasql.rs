use super::{StorageDeployer, StorageKind};
use crate::context::{aggregate_failures, TestContext};
use crate::error::Result;
use crate::kafka::certs::{self, CertStores};
use crate::kafka::{self, KafkaClusterRequest};
use crate::registry::{self, Configuration, KafkaSqlConfig};
use crate::suite::SuiteContext;
use async_trait::async_trait;
use tracing::{info, warn};

pub const CLUSTER_NAME: &str = "registry-kafka";
pub const TOPICS: [&str; 2] = ["storage-topic", "global-id-topic"];
const CLUSTERED_BROKERS: i32 = 3;

/// Broker cluster backing a registry, named like `sql::database_name`
pub fn cluster_name(registry_name: &str) -> String {
    if registry_name == registry::registry_name(StorageKind::KafkaSql.as_str()) {
        CLUSTER_NAME.to_string()
    } else {
        format!("{}-kafka", registry_name)
    }
}

/// Cluster request for a context: three brokers when clustered
pub fn cluster_request(ctx: &TestContext) -> KafkaClusterRequest {
    KafkaClusterRequest {
        name: cluster_name(&ctx.registry_name),
        namespace: ctx.namespace.clone(),
        replicas: if ctx.replicas > 1 { CLUSTERED_BROKERS } else { 1 },
        topics: TOPICS.iter().map(|t| t.to_string()).collect(),
        auth: ctx.security,
        external: false,
    }
}

pub fn kafkasql_configuration(bootstrap_servers: &str) -> Configuration {
    Configuration {
        persistence: Some(StorageKind::KafkaSql.to_string()),
        log_level: Some("DEBUG".to_string()),
        kafkasql: Some(KafkaSqlConfig {
            bootstrap_servers: bootstrap_servers.to_string(),
            security: None,
        }),
        ..Default::default()
    }
}

/// Strimzi cluster plus a registry using it as its journal
pub struct KafkaSqlDeployer;

#[async_trait]
impl StorageDeployer for KafkaSqlDeployer {
    fn kind(&self) -> StorageKind {
        StorageKind::KafkaSql
    }

    async fn deploy(&self, suite: &SuiteContext, ctx: &mut TestContext) -> Result<()> {
        let request = cluster_request(ctx);
        let info = kafka::deploy_kafka_cluster(suite, &request).await?;
        let mut configuration = kafkasql_configuration(&info.bootstrap_servers);

        let bootstrap_servers = info.bootstrap_servers.clone();
        let secured = match (info.auth, info.user.clone()) {
            (Some(auth), Some(user)) => Some((auth, user)),
            _ => None,
        };
        // Stored before anything else can fail, so removal finds the cluster
        ctx.kafka = Some(info);

        if let (Some((auth, user)), Some(cluster)) = (&secured, ctx.kafka.as_ref()) {
            let stores = certs::create_cert_stores(suite, cluster).await?;
            if let Some(kafkasql) = configuration.kafkasql.as_mut() {
                kafkasql.security = Some(certs::kafkasql_security(*auth, user, &stores));
            }
        }

        info!(
            registry = %ctx.registry_name,
            bootstrap_servers = %bootstrap_servers,
            security = ?ctx.security,
            "Deploying kafkasql registry"
        );
        let cr = registry::registry(&ctx.registry_name, &ctx.namespace, configuration);
        let created = registry::create_registry_and_wait(suite, ctx, cr).await;

        if secured.is_some() {
            if let Err(e) = certs::clean_cert_files(&suite.config.suite_project_dir).await {
                warn!(error = %e, "Failed to clean local cert files");
            }
        }
        created
    }

    async fn remove(&self, suite: &SuiteContext, ctx: &mut TestContext) -> Result<()> {
        let mut steps = vec![(
            format!("delete registry {}", ctx.registry_name),
            registry::delete_registry_and_wait(suite, &ctx.namespace, &ctx.registry_name).await,
        )];

        if let Some(cluster) = ctx.kafka.as_mut() {
            if let (Some(auth), Some(user)) = (cluster.auth, cluster.user.as_deref()) {
                let stores = CertStores::for_cluster(auth, &cluster.name, user);
                for secret in stores.secret_names() {
                    let deleted = suite
                        .cli
                        .execute(&["delete", "--ignore-not-found", "secret", secret, "-n", &ctx.namespace])
                        .await;
                    steps.push((format!("delete secret {}", secret), deleted));
                }
            }
            let step = format!("remove kafka cluster {}", cluster.name);
            steps.push((step, kafka::remove_kafka_cluster(suite, cluster).await));
        }
        aggregate_failures(steps)
    }
}
