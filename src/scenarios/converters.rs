//! Kafka Connect converters
//!
//! A Debezium connector streams PostgreSQL changes to Kafka using the
//! registry's Avro converters. The scenario checks both that records
//! arrive and that the converters registered the key and value schemas.

use super::{run_in_context, Scenario};
use crate::cmd::Cmd;
use crate::config::{env, Flags, SuiteConfig};
use crate::context::TestContext;
use crate::error::{Error, Result};
use crate::k8s;
use crate::kafka::consumer::{self, ConsumeRequest};
use crate::kafka::{self, KafkaClusterRequest};
use crate::probe;
use crate::registry;
use crate::storage::postgres;
use crate::storage::{deployer_for, StorageKind};
use crate::suite::SuiteContext;
use async_trait::async_trait;
use futures::FutureExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, PodSpec, PodTemplateSpec, Probe, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::core::DynamicObject;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

pub const NAME: &str = "converters";
pub const DEBEZIUM_NAME: &str = "apicurio-debezium";
pub const DEBEZIUM_IMAGE: &str = "localhost:5000/apicurio-debezium:latest";
const DEBEZIUM_PORT: i32 = 8083;
const DEBEZIUM_READY_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_API_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECTOR_TIMEOUT: Duration = Duration::from_secs(45);

pub const KAFKA_CLUSTER: &str = "test-debezium-kafka";

pub const DATABASE_NAME: &str = "test-db";
const DATABASE_USER: &str = "testuser";
const DATABASE_PASSWORD: &str = "testpwd";

pub const CONNECTOR_NAME: &str = "my-connector-avro";
const SERVER_NAME: &str = "dbserver1";
pub const TOPIC: &str = "dbserver1.public.outbox";
const EXPECTED_RECORDS: usize = 2;
const CONSUMER_TIMEOUT: Duration = Duration::from_secs(120);

const AVRO_CONVERTER: &str = "io.apicurio.registry.utils.converter.AvroConverter";
const AUTO_REGISTER_STRATEGY: &str = "io.apicurio.registry.utils.serde.strategy.AutoRegisterIdStrategy";

fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), DEBEZIUM_NAME.to_string())])
}

fn metadata(namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(DEBEZIUM_NAME.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels()),
        ..Default::default()
    }
}

/// `docker build` of the Debezium image bundling the converters
///
/// The distribution URL is required; its checksum is passed when set.
pub fn image_build_command(config: &SuiteConfig) -> Result<Cmd> {
    let url = config.converters_url.as_deref().ok_or_else(|| {
        Error::Config(format!("{} is required by the converters scenario", env::CONVERTERS_URL))
    })?;
    let context = config.suite_project_dir.join("scripts").join("converters");

    let mut cmd = Cmd::new("docker")
        .args(["build", "-t", DEBEZIUM_IMAGE])
        .arg("--build-arg")
        .arg(format!("CONVERTERS_URL={}", url));
    if let Some(sum) = &config.converters_sha512sum {
        cmd = cmd.arg("--build-arg").arg(format!("CONVERTERS_SHA512SUM={}", sum));
    }
    Ok(cmd.arg(context.display().to_string()))
}

pub fn debezium_deployment(namespace: &str, bootstrap_servers: &str) -> Deployment {
    let env = [
        ("BOOTSTRAP_SERVERS", bootstrap_servers),
        ("GROUP_ID", "1"),
        ("CONFIG_STORAGE_TOPIC", "debezium_connect_config"),
        ("OFFSET_STORAGE_TOPIC", "debezium_connect_offsets"),
        ("STATUS_STORAGE_TOPIC", "debezium_connect_status"),
        ("CONNECT_KEY_CONVERTER_SCHEMAS_ENABLE", "false"),
        ("CONNECT_VALUE_CONVERTER_SCHEMAS_ENABLE", "false"),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    })
    .collect();

    let connectors_probe = |initial_delay: i32, period: i32| Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/connectors".to_string()),
            port: IntOrString::Int(DEBEZIUM_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        ..Default::default()
    };

    Deployment {
        metadata: metadata(namespace),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: DEBEZIUM_NAME.to_string(),
                        image: Some(DEBEZIUM_IMAGE.to_string()),
                        env: Some(env),
                        ports: Some(vec![ContainerPort {
                            container_port: DEBEZIUM_PORT,
                            name: Some("http".to_string()),
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        readiness_probe: Some(Probe {
                            success_threshold: Some(2),
                            ..connectors_probe(25, 10)
                        }),
                        liveness_probe: Some(connectors_probe(25, 15)),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn debezium_service(namespace: &str) -> Service {
    Service {
        metadata: metadata(namespace),
        spec: Some(ServiceSpec {
            selector: Some(labels()),
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                port: DEBEZIUM_PORT,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(DEBEZIUM_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Connector streaming the outbox table through the registry converters
pub fn connector_request(registry_api_url: &str) -> Value {
    let mut config = json!({
        "tasks.max": 1,
        "connector.class": "io.debezium.connector.postgresql.PostgresConnector",
        "database.hostname": DATABASE_NAME,
        "database.port": postgres::POSTGRES_PORT,
        "database.user": DATABASE_USER,
        "database.password": DATABASE_PASSWORD,
        "database.dbname": DATABASE_NAME,
        "database.server.name": SERVER_NAME,
        "slot.name": "debezium_1",
        "table.include.list": "public.outbox",
    });
    for side in ["key", "value"] {
        config[format!("{}.converter", side)] = json!(AVRO_CONVERTER);
        config[format!("{}.converter.apicurio.registry.url", side)] = json!(registry_api_url);
        config[format!("{}.converter.apicurio.registry.global-id", side)] = json!(AUTO_REGISTER_STRATEGY);
        config[format!("{}.converter.apicurio.registry.converter.serializer", side)] =
            json!("io.apicurio.registry.utils.serde.AvroKafkaSerializer");
        config[format!("{}.converter.apicurio.registry.converter.deserializer", side)] =
            json!("io.apicurio.registry.utils.serde.AvroKafkaDeserializer");
    }
    json!({ "name": CONNECTOR_NAME, "config": config })
}

/// Artifacts the converters register for `topic`
pub fn expected_artifacts(topic: &str) -> [String; 2] {
    [format!("{}-key", topic), format!("{}-value", topic)]
}

async fn build_debezium_image(config: &SuiteConfig) -> Result<()> {
    info!(image = %DEBEZIUM_IMAGE, "Building debezium image");
    image_build_command(config)?.run().await?;
    Cmd::new("docker").args(["push", DEBEZIUM_IMAGE]).run().await?;
    Ok(())
}

/// Create the Debezium Deployment, Service and its exposure
///
/// Returns the external Kafka Connect base URL once it answers.
async fn deploy_debezium(suite: &SuiteContext, namespace: &str, bootstrap_servers: &str) -> Result<String> {
    info!(namespace = %namespace, "Deploying debezium");
    let client = &suite.client;
    let pp = PostParams::default();

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    deployments
        .create(&pp, &debezium_deployment(namespace, bootstrap_servers))
        .await?;
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    services.create(&pp, &debezium_service(namespace)).await?;

    let host = registry::nip_io_host(DEBEZIUM_NAME);
    if suite.is_openshift {
        let routes: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), namespace, &k8s::route_resource());
        routes
            .create(&pp, &k8s::service_route(namespace, DEBEZIUM_NAME, DEBEZIUM_NAME))
            .await?;
    } else {
        let ingresses: Api<Ingress> = Api::namespaced(client.clone(), namespace);
        ingresses
            .create(
                &pp,
                &k8s::nip_io_ingress(namespace, DEBEZIUM_NAME, &host, DEBEZIUM_NAME, DEBEZIUM_PORT),
            )
            .await?;
    }

    k8s::wait_for_deployment_ready(client, &suite.cli, namespace, DEBEZIUM_NAME, 1, DEBEZIUM_READY_TIMEOUT)
        .await?;

    let url = if suite.is_openshift {
        let routes: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), namespace, &k8s::route_resource());
        let route = routes.get(DEBEZIUM_NAME).await?;
        let host = registry::route_host(&route)
            .ok_or_else(|| Error::MissingField(format!("route {} ingress host", DEBEZIUM_NAME)))?;
        format!("http://{}", host)
    } else {
        format!("http://{}:{}", host, registry::EXTERNAL_PORT)
    };
    probe::wait_for_status(&format!("{}/connectors", url), None, StatusCode::OK, CONNECT_API_TIMEOUT).await?;
    Ok(url)
}

async fn remove_debezium(suite: &SuiteContext, namespace: &str) -> Result<()> {
    info!(namespace = %namespace, "Removing debezium");
    let client = &suite.client;
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    k8s::delete_and_wait(&deployments, "deployment", DEBEZIUM_NAME).await?;
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    k8s::delete_and_wait(&services, "service", DEBEZIUM_NAME).await?;
    if suite.is_openshift {
        let routes: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), namespace, &k8s::route_resource());
        k8s::delete_and_wait(&routes, "route", DEBEZIUM_NAME).await
    } else {
        let ingresses: Api<Ingress> = Api::namespaced(client.clone(), namespace);
        k8s::delete_and_wait(&ingresses, "ingress", DEBEZIUM_NAME).await
    }
}

async fn create_connector(debezium_url: &str, registry_api_url: &str) -> Result<()> {
    let url = format!("{}/connectors/", debezium_url);
    let request = connector_request(registry_api_url);
    info!(connector = %CONNECTOR_NAME, url = %url, "Creating debezium connector");

    let response = reqwest::Client::new().post(&url).json(&request).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::UnexpectedStatus {
            status: status.as_u16(),
            url,
        });
    }

    probe::wait_for_status(
        &format!("{}/connectors/{}", debezium_url, CONNECTOR_NAME),
        None,
        StatusCode::OK,
        CONNECTOR_TIMEOUT,
    )
    .await
}

async fn execute_sql(suite: &SuiteContext, namespace: &str, pod: &str, sql: &str) -> Result<()> {
    suite
        .cli
        .exec(
            namespace,
            pod,
            &["psql", "-d", DATABASE_NAME, "-U", DATABASE_USER, "-c", sql],
        )
        .await
        .map(|_| ())
}

async fn converters_test(suite: &SuiteContext, ctx: &mut TestContext) -> Result<()> {
    deployer_for(ctx.storage).deploy(suite, ctx).await?;
    probe::basic_api_probe(ctx).await?;
    build_debezium_image(&suite.config).await?;
    let namespace = ctx.namespace.clone();

    let request = KafkaClusterRequest {
        name: KAFKA_CLUSTER.to_string(),
        namespace: namespace.clone(),
        replicas: 1,
        topics: Vec::new(),
        auth: None,
        // Records are consumed from inside the broker pod
        external: false,
    };
    let mut cluster = kafka::deploy_kafka_cluster(suite, &request).await?;
    let bootstrap_servers = cluster.bootstrap_servers.clone();
    let owner = suite.clone();
    ctx.cleanups.register("remove debezium kafka", move || {
        async move { kafka::remove_kafka_cluster(&owner, &mut cluster).await }.boxed()
    });

    let db = postgres::deploy_postgresql_database(
        suite,
        &namespace,
        DATABASE_NAME,
        DATABASE_NAME,
        DATABASE_USER,
        DATABASE_PASSWORD,
    )
    .await;
    let (owner, ns) = (suite.clone(), namespace.clone());
    ctx.cleanups.register("remove debezium database", move || {
        async move { postgres::remove_postgresql_database(&owner, &ns, DATABASE_NAME).await }.boxed()
    });
    db?;

    let debezium = deploy_debezium(suite, &namespace, &bootstrap_servers).await;
    let (owner, ns) = (suite.clone(), namespace.clone());
    ctx.cleanups.register("remove debezium", move || {
        async move { remove_debezium(&owner, &ns).await }.boxed()
    });
    let debezium_url = debezium?;

    let pod = postgres::postgres_pod(suite, &namespace, DATABASE_NAME).await?;
    for sql in [
        "drop table if exists public.outbox",
        "create table public.outbox (id int8 not null, payload varchar(255), primary key (id))",
        "alter table public.outbox replica identity full",
    ] {
        execute_sql(suite, &namespace, &pod, sql).await?;
    }

    let (host, port) = ctx.registry_internal_endpoint()?;
    create_connector(&debezium_url, &format!("http://{}:{}/api/", host, port)).await?;

    let records = consumer::spawn_consumer(
        suite.cli.clone(),
        ConsumeRequest {
            namespace: namespace.clone(),
            cluster: KAFKA_CLUSTER.to_string(),
            topic: TOPIC.to_string(),
            max_messages: EXPECTED_RECORDS,
            timeout: CONSUMER_TIMEOUT,
        },
    );
    for sql in [
        "insert into public.outbox values (1, 'Be Awesome')",
        "insert into public.outbox values (2, 'Even more')",
    ] {
        execute_sql(suite, &namespace, &pod, sql).await?;
    }
    let records = consumer::await_records(records).await?;
    info!(records = records.len(), topic = %TOPIC, "Debezium records consumed");

    let artifacts = ctx.registry_client()?.list_artifacts().await?;
    info!(artifacts = ?artifacts, "Artifacts after debezium");
    let missing: Vec<_> = expected_artifacts(TOPIC)
        .into_iter()
        .filter(|id| !artifacts.contains(id))
        .collect();
    if !missing.is_empty() {
        return Err(Error::scenario(format!(
            "converters did not register {:?}, registry lists {:?}",
            missing, artifacts
        )));
    }
    Ok(())
}

pub struct ConvertersScenario;

#[async_trait]
impl Scenario for ConvertersScenario {
    fn name(&self) -> String {
        NAME.to_string()
    }

    fn should_skip(&self, flags: &Flags) -> bool {
        flags.disable_converters_tests || flags.only_test_operator
    }

    async fn run(&self, suite: &SuiteContext) -> Result<()> {
        let mut ctx = TestContext::new(StorageKind::Sql).with_id(NAME);
        let deployer = deployer_for(ctx.storage);
        run_in_context(suite, &mut ctx, Some(deployer.as_ref()), |suite, ctx| {
            converters_test(suite, ctx).boxed()
        })
        .await
    }
}
