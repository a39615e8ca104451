//! Backup and restore of a sql registry
//!
//! Artifacts written through one registry are dumped from its database by
//! a helper pod, restored into a fresh database, and must be served by a
//! second registry pointing at the copy.

use super::{run_in_context, Scenario};
use crate::config::Flags;
use crate::context::TestContext;
use crate::error::{Error, Result};
use crate::k8s;
use crate::probe;
use crate::registry;
use crate::storage::postgres::{self, DbData};
use crate::storage::sql::sql_configuration;
use crate::storage::StorageKind;
use crate::suite::SuiteContext;
use async_trait::async_trait;
use futures::FutureExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodTemplateSpec, SecurityContext};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, ListParams, ObjectMeta, PostParams};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

pub const NAME: &str = "backup-restore";
pub const ARTIFACT_PREFIX: &str = "bandr";
pub const ARTIFACT_COUNT: usize = 50;

pub const BACKUP_DB: &str = "backupdb";
pub const RESTORE_DB: &str = "restoredb";
const DB_USER: &str = "test";
const DB_PASSWORD: &str = "test";
pub const BACKUP_REGISTRY: &str = "backupregistry";
pub const RESTORE_REGISTRY: &str = "restoreregistry";

pub const PLAYGROUND: &str = "dbplayground";
const PLAYGROUND_IMAGE: &str = "quay.io/rh_integration/service-registry-dbplayground:pg10";
const PLAYGROUND_READY_TIMEOUT: Duration = Duration::from_secs(120);

fn playground_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("apicurio".to_string(), PLAYGROUND.to_string())])
}

/// Privileged helper pod carrying the dump and restore scripts
pub fn playground_deployment(namespace: &str) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(PLAYGROUND.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(playground_labels()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(playground_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(PLAYGROUND.to_string()),
                    containers: vec![Container {
                        name: PLAYGROUND.to_string(),
                        image: Some(PLAYGROUND_IMAGE.to_string()),
                        security_context: Some(SecurityContext {
                            privileged: Some(true),
                            ..Default::default()
                        }),
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

/// Arguments of the playground's backup and restore scripts
pub fn script_args(script: &str, db: &DbData) -> Vec<String> {
    vec![
        script.to_string(),
        db.host.clone(),
        db.port.to_string(),
        db.database.clone(),
        db.user.clone(),
        db.password.clone(),
    ]
}

async fn deploy_database(suite: &SuiteContext, ctx: &mut TestContext, name: &str) -> Result<DbData> {
    let db = postgres::deploy_postgresql_database(suite, &ctx.namespace, name, name, DB_USER, DB_PASSWORD).await;
    let (owner, namespace, db_name) = (suite.clone(), ctx.namespace.clone(), name.to_string());
    ctx.cleanups.register(format!("remove database {}", name), move || {
        async move { postgres::remove_postgresql_database(&owner, &namespace, &db_name).await }.boxed()
    });
    db
}

/// Create a sql registry on `db`, wait for it and probe it
async fn deploy_registry(suite: &SuiteContext, ctx: &mut TestContext, name: &str, db: &DbData) -> Result<()> {
    let (owner, namespace, registry_name) = (suite.clone(), ctx.namespace.clone(), name.to_string());
    ctx.cleanups.register(format!("remove registry {}", name), move || {
        async move {
            if registry::registry_exists(&owner, &namespace, &registry_name).await? {
                registry::delete_registry_and_wait(&owner, &namespace, &registry_name).await?;
            }
            Ok(())
        }
        .boxed()
    });

    let cr = registry::registry(name, &ctx.namespace, sql_configuration(db));
    registry::create_registry_and_wait(suite, ctx, cr).await?;
    probe::basic_api_probe(ctx).await
}

/// Deploy the playground and return its pod name
async fn deploy_playground(suite: &SuiteContext, ctx: &mut TestContext) -> Result<String> {
    let namespace = ctx.namespace.clone();
    info!(namespace = %namespace, "Deploying dbplayground");

    suite
        .cli
        .execute(&["create", "serviceaccount", PLAYGROUND, "-n", &namespace])
        .await?;
    let (owner, ns) = (suite.clone(), namespace.clone());
    ctx.cleanups.register("remove dbplayground", move || {
        async move {
            let deployments: Api<Deployment> = Api::namespaced(owner.client.clone(), &ns);
            k8s::delete_and_wait(&deployments, "deployment", PLAYGROUND).await?;
            owner
                .cli
                .execute(&["delete", "--ignore-not-found", "serviceaccount", PLAYGROUND, "-n", &ns])
                .await
        }
        .boxed()
    });

    if suite.is_openshift {
        let user = format!("system:serviceaccount:{}:{}", namespace, PLAYGROUND);
        suite
            .cli
            .execute(&["adm", "policy", "add-scc-to-user", "privileged", &user, "-n", &namespace])
            .await?;
    }

    let deployments: Api<Deployment> = Api::namespaced(suite.client.clone(), &namespace);
    deployments
        .create(&PostParams::default(), &playground_deployment(&namespace))
        .await?;
    k8s::wait_for_deployment_ready(
        &suite.client,
        &suite.cli,
        &namespace,
        PLAYGROUND,
        1,
        PLAYGROUND_READY_TIMEOUT,
    )
    .await?;

    let pods: Api<Pod> = Api::namespaced(suite.client.clone(), &namespace);
    let list = pods
        .list(&ListParams::default().labels(&format!("apicurio={}", PLAYGROUND)))
        .await?;
    list.items
        .into_iter()
        .find_map(|p| p.metadata.name)
        .ok_or_else(|| Error::MissingField(format!("pod for {}/{}", namespace, PLAYGROUND)))
}

async fn run_script(suite: &SuiteContext, namespace: &str, pod: &str, script: &str, db: &DbData) -> Result<()> {
    let args = script_args(script, db);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    suite.cli.exec(namespace, pod, &args).await.map(|_| ())
}

async fn backup_and_restore(suite: &SuiteContext, ctx: &mut TestContext) -> Result<()> {
    let namespace = ctx.namespace.clone();

    let backup_db = deploy_database(suite, ctx, BACKUP_DB).await?;
    deploy_registry(suite, ctx, BACKUP_REGISTRY, &backup_db).await?;
    let client = ctx.registry_client()?;
    client.create_artifacts(ARTIFACT_PREFIX, ARTIFACT_COUNT).await?;
    client.verify_artifacts(ARTIFACT_PREFIX, ARTIFACT_COUNT).await?;

    let pod = deploy_playground(suite, ctx).await?;
    run_script(suite, &namespace, &pod, "./create_backup.sh", &backup_db).await?;
    info!(database = %BACKUP_DB, "Backup performed");

    registry::delete_registry_and_wait(suite, &namespace, BACKUP_REGISTRY).await?;
    postgres::remove_postgresql_database(suite, &namespace, BACKUP_DB).await?;

    let restore_db = deploy_database(suite, ctx, RESTORE_DB).await?;
    run_script(suite, &namespace, &pod, "./restore_backup.sh", &restore_db).await?;
    info!(database = %RESTORE_DB, "Database restored");

    deploy_registry(suite, ctx, RESTORE_REGISTRY, &restore_db).await?;
    ctx.registry_client()?
        .verify_artifacts(ARTIFACT_PREFIX, ARTIFACT_COUNT)
        .await
}

pub struct BackupRestoreScenario;

#[async_trait]
impl Scenario for BackupRestoreScenario {
    fn name(&self) -> String {
        NAME.to_string()
    }

    fn should_skip(&self, _flags: &Flags) -> bool {
        false
    }

    async fn run(&self, suite: &SuiteContext) -> Result<()> {
        let mut ctx = TestContext::new(StorageKind::Sql).with_id(NAME);
        run_in_context(suite, &mut ctx, None, |suite, ctx| backup_and_restore(suite, ctx).boxed()).await
    }
}
