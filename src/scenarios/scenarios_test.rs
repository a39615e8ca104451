use super::*;
use crate::config::{env, InstallerKind};
use crate::error::Error;
use crate::keycloak::KeycloakInfo;
use crate::storage::postgres::DbData;
use std::collections::HashMap;

fn config_from(vars: &[(&str, &str)]) -> SuiteConfig {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    SuiteConfig::from_lookup(|key| map.get(key).cloned()).expect("config")
}

fn test_config() -> SuiteConfig {
    config_from(&[(env::SUITE_PROJECT_DIR, "/suite")])
}

fn names(flags: &Flags) -> Vec<String> {
    catalog(flags, &test_config())
        .iter()
        .map(|s| s.name())
        .collect()
}

fn deployed(mut ctx: TestContext, host: &str, port: u16) -> TestContext {
    ctx.registry_host = Some(host.to_string());
    ctx.registry_port = port;
    ctx
}

#[test]
fn test_catalog_lists_every_scenario_in_order() {
    // ACT
    let names = names(&Flags::default());

    // ASSERT
    assert_eq!(
        names,
        vec![
            "sql",
            "kafkasql",
            "infinispan",
            "clustered-sql",
            "clustered-kafkasql",
            "kafkasql-tls",
            "kafkasql-scram",
            "migration",
            "converters",
            "backup-restore",
            "security",
            "multinamespace",
            "upgrade",
        ]
    );
}

#[test]
fn test_catalog_names_are_unique() {
    let mut names = names(&Flags::default());
    let total = names.len();
    names.sort();
    names.dedup();

    assert_eq!(names.len(), total);
}

#[test]
fn test_default_flags_skip_only_flag_gated_scenarios() {
    // ARRANGE
    let flags = Flags::default();

    // ACT
    let skipped: Vec<String> = catalog(&flags, &test_config())
        .iter()
        .filter(|s| s.should_skip(&flags))
        .map(|s| s.name())
        .collect();

    // ASSERT
    assert_eq!(
        skipped,
        vec!["kafkasql-tls", "kafkasql-scram", "multinamespace", "upgrade"]
    );
}

#[test]
fn test_only_test_operator_keeps_operator_scenarios() {
    let flags = Flags {
        only_test_operator: true,
        ..Default::default()
    };

    let running: Vec<String> = catalog(&flags, &test_config())
        .iter()
        .filter(|s| !s.should_skip(&flags))
        .map(|s| s.name())
        .collect();

    assert_eq!(
        running,
        vec![
            "sql",
            "kafkasql",
            "infinispan",
            "clustered-sql",
            "clustered-kafkasql",
            "kafkasql-tls",
            "kafkasql-scram",
            "backup-restore",
            "security",
        ]
    );
}

#[test]
fn test_disable_flags_skip_their_scenarios() {
    let flags = Flags {
        disable_clustered_tests: true,
        disable_converters_tests: true,
        disable_auth_tests: true,
        ..Default::default()
    };

    assert!(StorageScenario::clustered(StorageKind::Sql).should_skip(&flags));
    assert!(converters::ConvertersScenario.should_skip(&flags));
    assert!(security::SecurityScenario.should_skip(&flags));
    assert!(!StorageScenario::basic(StorageKind::Sql).should_skip(&flags));
    assert!(!backup::BackupRestoreScenario.should_skip(&flags));
}

#[test]
fn test_multinamespace_needs_cluster_wide_install() {
    let scenario = multinamespace::MultiNamespaceScenario;

    for (installer, skipped) in [
        (InstallerKind::Bundle, true),
        (InstallerKind::Olm, true),
        (InstallerKind::OlmClusterwide, false),
    ] {
        let flags = Flags {
            installer,
            ..Default::default()
        };
        assert_eq!(scenario.should_skip(&flags), skipped, "{:?}", installer);
    }
}

#[test]
fn test_upgrade_needs_namespaced_olm_and_advanced_flag() {
    let scenario = upgrade::UpgradeScenario;
    let olm = Flags {
        installer: InstallerKind::Olm,
        ..Default::default()
    };
    let advanced_bundle = Flags {
        enable_olm_advanced_tests: true,
        ..Default::default()
    };
    let advanced_olm = Flags {
        enable_olm_advanced_tests: true,
        installer: InstallerKind::Olm,
        ..Default::default()
    };

    assert!(scenario.should_skip(&olm));
    assert!(scenario.should_skip(&advanced_bundle));
    assert!(!scenario.should_skip(&advanced_olm));
}

#[test]
fn test_storage_scenario_contexts() {
    // ACT
    let basic = StorageScenario::basic(StorageKind::Infinispan).context();
    let clustered = StorageScenario::clustered(StorageKind::KafkaSql).context();
    let secured = StorageScenario::secured_kafkasql(KafkaAuth::Scram).context();

    // ASSERT
    assert_eq!(basic.id, "infinispan");
    assert_eq!(basic.replicas, 1);
    assert_eq!(basic.security, None);

    assert_eq!(clustered.id, "clustered-kafkasql");
    assert_eq!(clustered.replicas, 3);
    assert_eq!(clustered.storage, StorageKind::KafkaSql);

    assert_eq!(secured.id, "kafkasql-scram");
    assert_eq!(secured.security, Some(KafkaAuth::Scram));
    assert!(secured.cleanups.is_empty());
}

#[test]
fn test_migration_sides_share_the_owner_namespace() {
    // ARRANGE
    let owner = TestContext::new(migration::SOURCE_STORAGE)
        .with_id("migration")
        .with_namespace("ns-a");

    // ACT
    let source = migration::side_context(&owner, "source", StorageKind::Sql, migration::SOURCE_REGISTRY);
    let dest = migration::side_context(&owner, "dest", StorageKind::KafkaSql, migration::DEST_REGISTRY);

    // ASSERT
    assert_eq!(source.id, "source-migration");
    assert_eq!(source.namespace, "ns-a");
    assert_eq!(source.registry_name, "source-registry");
    assert_eq!(dest.id, "dest-migration");
    assert_eq!(dest.storage, StorageKind::KafkaSql);
    assert_eq!(dest.registry_name, "dest-registry");
}

#[test]
fn test_migration_env_carries_both_endpoints() {
    let source = deployed(TestContext::new(StorageKind::Sql), "source.example", 80);
    let dest = deployed(TestContext::new(StorageKind::KafkaSql), "dest.example", 8080);

    let vars = migration::migration_env(&source, &dest).expect("env");

    assert_eq!(
        vars,
        vec![
            ("SOURCE_REGISTRY_HOST".to_string(), "source.example".to_string()),
            ("SOURCE_REGISTRY_PORT".to_string(), "80".to_string()),
            ("DEST_REGISTRY_HOST".to_string(), "dest.example".to_string()),
            ("DEST_REGISTRY_PORT".to_string(), "8080".to_string()),
        ]
    );
}

#[test]
fn test_migration_env_requires_deployed_registries() {
    let source = deployed(TestContext::new(StorageKind::Sql), "source.example", 80);
    let dest = TestContext::new(StorageKind::KafkaSql);

    let err = migration::migration_env(&source, &dest).expect_err("dest has no host");

    assert!(matches!(err, Error::MissingField(_)));
}

#[test]
fn test_converters_image_build_requires_url() {
    let err = converters::image_build_command(&test_config()).expect_err("no url");

    assert!(matches!(err, Error::Config(ref m) if m.contains(env::CONVERTERS_URL)));
}

#[test]
fn test_converters_image_build_passes_url_and_checksum() {
    // ARRANGE
    let config = config_from(&[
        (env::SUITE_PROJECT_DIR, "/suite"),
        (env::CONVERTERS_URL, "https://example.com/converters.tar.gz"),
        (env::CONVERTERS_SHA512SUM, "abc123"),
    ]);

    // ACT
    let cmd = converters::image_build_command(&config).expect("cmd");

    // ASSERT
    assert_eq!(cmd.program, "docker");
    assert_eq!(
        cmd.args,
        vec![
            "build",
            "-t",
            converters::DEBEZIUM_IMAGE,
            "--build-arg",
            "CONVERTERS_URL=https://example.com/converters.tar.gz",
            "--build-arg",
            "CONVERTERS_SHA512SUM=abc123",
            "/suite/scripts/converters",
        ]
    );
}

#[test]
fn test_converters_image_build_without_checksum() {
    let config = config_from(&[
        (env::SUITE_PROJECT_DIR, "/suite"),
        (env::CONVERTERS_URL, "https://example.com/converters.tar.gz"),
    ]);

    let cmd = converters::image_build_command(&config).expect("cmd");

    assert!(!cmd.args.iter().any(|a| a.starts_with("CONVERTERS_SHA512SUM")));
    assert_eq!(cmd.args.last().map(String::as_str), Some("/suite/scripts/converters"));
}

#[test]
fn test_connector_request_points_both_converters_at_registry() {
    // ACT
    let request = converters::connector_request("http://registry.internal:8080/api/");

    // ASSERT
    assert_eq!(request["name"], converters::CONNECTOR_NAME);
    let config = &request["config"];
    assert_eq!(config["database.dbname"], converters::DATABASE_NAME);
    assert_eq!(config["table.include.list"], "public.outbox");
    for side in ["key", "value"] {
        assert_eq!(
            config[format!("{}.converter.apicurio.registry.url", side)],
            "http://registry.internal:8080/api/"
        );
        assert!(config[format!("{}.converter", side)].is_string());
    }
}

#[test]
fn test_debezium_manifests_share_labels_and_port() {
    let deployment = converters::debezium_deployment("ns-c", "kafka-bootstrap:9092");
    let service = converters::debezium_service("ns-c");

    assert_eq!(deployment.metadata.name.as_deref(), Some(converters::DEBEZIUM_NAME));
    assert_eq!(deployment.metadata.namespace.as_deref(), Some("ns-c"));
    let spec = deployment.spec.expect("spec");
    let pod = spec.template.spec.expect("pod spec");
    let container = &pod.containers[0];
    assert_eq!(container.image.as_deref(), Some(converters::DEBEZIUM_IMAGE));
    let env = container.env.as_ref().expect("env");
    assert!(env
        .iter()
        .any(|e| e.name == "BOOTSTRAP_SERVERS" && e.value.as_deref() == Some("kafka-bootstrap:9092")));

    let service_spec = service.spec.expect("service spec");
    assert_eq!(service_spec.selector, spec.selector.match_labels);
    assert_eq!(service_spec.ports.expect("ports")[0].port, 8083);
}

#[test]
fn test_expected_artifacts_cover_key_and_value() {
    assert_eq!(
        converters::expected_artifacts(converters::TOPIC),
        [
            "dbserver1.public.outbox-key".to_string(),
            "dbserver1.public.outbox-value".to_string(),
        ]
    );
}

#[test]
fn test_playground_deployment_is_privileged() {
    // ACT
    let deployment = backup::playground_deployment("ns-b");

    // ASSERT
    assert_eq!(deployment.metadata.name.as_deref(), Some(backup::PLAYGROUND));
    let spec = deployment.spec.expect("spec");
    let selector = spec.selector.match_labels.clone().expect("selector");
    assert_eq!(selector.get("apicurio").map(String::as_str), Some("dbplayground"));
    let pod = spec.template.spec.expect("pod spec");
    assert_eq!(pod.service_account_name.as_deref(), Some(backup::PLAYGROUND));
    let privileged = pod.containers[0]
        .security_context
        .as_ref()
        .and_then(|s| s.privileged);
    assert_eq!(privileged, Some(true));
}

#[test]
fn test_backup_script_args_follow_database() {
    let db = DbData::new("backupdb", "10.0.0.7", "backupdb", "test", "test");

    let args = backup::script_args("./create_backup.sh", &db);

    assert_eq!(
        args,
        vec!["./create_backup.sh", "10.0.0.7", "5432", "backupdb", "test", "test"]
    );
}

#[test]
fn test_secured_context_carries_keycloak() {
    let keycloak = KeycloakInfo::new("http://keycloak.example/", "ns-k");

    let ctx = security::secured_context(StorageKind::KafkaSql, &keycloak);

    assert_eq!(ctx.id, "security-kafkasql");
    assert_eq!(ctx.namespace, "ns-k");
    assert!(ctx.skip_functional_tests);
    assert_eq!(
        ctx.keycloak.map(|k| k.url),
        Some("http://keycloak.example".to_string())
    );
}

#[test]
fn test_multinamespace_contexts_get_own_namespace_and_name() {
    let first = multinamespace::namespace_context(1);
    let second = multinamespace::namespace_context(2);

    assert_eq!(first.namespace, "test-multinamespace-1");
    assert_eq!(first.registry_name, "test-multinamespace-1");
    assert_eq!(first.storage, StorageKind::Infinispan);
    assert_eq!(second.id, "test-multinamespace-2");
    assert_ne!(first.registry_name, second.registry_name);
}

#[test]
fn test_upgrade_plan_requires_complete_config() {
    let err = upgrade::UpgradePlan::from_config(&test_config()).expect_err("incomplete");

    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_upgrade_plan_subscribes_to_old_csv() {
    // ARRANGE
    let config = config_from(&[
        (env::SUITE_PROJECT_DIR, "/suite"),
        (env::OLM_CATALOG_SOURCE_IMAGE, "quay.io/example/catalog:latest"),
        (env::OLM_UPGRADE_CHANNEL, "2.x"),
        (env::OLM_UPGRADE_OLD_CATALOG, "old-catalog"),
        (env::OLM_UPGRADE_OLD_CATALOG_NAMESPACE, "olm"),
        (env::OLM_UPGRADE_OLD_CSV, "apicurio-registry.v1"),
        (env::OLM_UPGRADE_NEW_CSV, "apicurio-registry.v2"),
    ]);

    // ACT
    let plan = upgrade::UpgradePlan::from_config(&config).expect("plan");
    let sub = plan.old_subscription();

    // ASSERT
    assert_eq!(plan.catalog_image, "quay.io/example/catalog:latest");
    assert_eq!(plan.new_csv, "apicurio-registry.v2");
    assert_eq!(sub.name, upgrade::SUBSCRIPTION);
    assert_eq!(sub.namespace, upgrade::NAMESPACE);
    assert_eq!(sub.package, "apicurio-registry");
    assert_eq!(sub.catalog_source, "old-catalog");
    assert_eq!(sub.catalog_source_namespace, "olm");
    assert_eq!(sub.starting_csv, "apicurio-registry.v1");
}

#[test]
fn test_upgrade_plan_requires_catalog_image() {
    let config = config_from(&[
        (env::SUITE_PROJECT_DIR, "/suite"),
        (env::OLM_UPGRADE_CHANNEL, "2.x"),
        (env::OLM_UPGRADE_OLD_CATALOG, "old-catalog"),
        (env::OLM_UPGRADE_OLD_CATALOG_NAMESPACE, "olm"),
        (env::OLM_UPGRADE_OLD_CSV, "apicurio-registry.v1"),
        (env::OLM_UPGRADE_NEW_CSV, "apicurio-registry.v2"),
    ]);

    let err = upgrade::UpgradePlan::from_config(&config).expect_err("no image");

    assert!(matches!(err, Error::Config(ref m) if m.contains("catalog source image")));
}

type Log = std::sync::Arc<std::sync::Mutex<Vec<String>>>;

fn record(log: &Log, entry: impl Into<String>) {
    log.lock().expect("lock").push(entry.into());
}

/// Records removal, and whether the namespace logs were already on disk
struct RecordingDeployer {
    log: Log,
    fail_remove: bool,
}

#[async_trait]
impl StorageDeployer for RecordingDeployer {
    fn kind(&self) -> StorageKind {
        StorageKind::Infinispan
    }

    async fn deploy(&self, _suite: &SuiteContext, _ctx: &mut TestContext) -> Result<()> {
        record(&self.log, "deploy");
        Ok(())
    }

    async fn remove(&self, suite: &SuiteContext, ctx: &mut TestContext) -> Result<()> {
        let logs = logs::scenario_logs_dir(&suite.logs_dir(), &ctx.id, &ctx.namespace);
        record(&self.log, format!("remove (logs saved: {})", logs.exists()));
        if self.fail_remove {
            Err(Error::scenario("registry still there"))
        } else {
            Ok(())
        }
    }
}

fn scratch_suite() -> (SuiteContext, std::path::PathBuf) {
    let dir = std::env::temp_dir().join(format!("registry-e2e-{}", uuid::Uuid::new_v4()));
    let config = config_from(&[(env::SUITE_PROJECT_DIR, dir.to_str().expect("utf-8 path"))]);
    (SuiteContext::offline(config, Flags::default()), dir)
}

fn register_recorded_cleanup(ctx: &mut TestContext, log: &Log, name: &'static str) {
    let log = log.clone();
    ctx.cleanups.register(name, move || {
        async move {
            record(&log, name);
            Ok(())
        }
        .boxed()
    });
}

#[tokio::test]
async fn test_run_in_context_tears_down_after_body_error() {
    // ARRANGE
    let (suite, dir) = scratch_suite();
    let log: Log = Default::default();
    let deployer = RecordingDeployer {
        log: log.clone(),
        fail_remove: false,
    };
    let mut ctx = TestContext::new(StorageKind::Infinispan);
    register_recorded_cleanup(&mut ctx, &log, "registered before body");
    let body_log = log.clone();

    // ACT
    let result = run_in_context(&suite, &mut ctx, Some(&deployer), move |_suite, ctx| {
        async move {
            register_recorded_cleanup(ctx, &body_log, "registered in body");
            record(&body_log, "body");
            Err(Error::scenario("registry never became ready"))
        }
        .boxed()
    })
    .await;
    tokio::fs::remove_dir_all(&dir).await.ok();

    // ASSERT: logs, then storage, then cleanups newest first
    assert!(matches!(result, Err(Error::Scenario(ref m)) if m == "registry never became ready"));
    assert_eq!(
        *log.lock().expect("lock"),
        vec![
            "body",
            "remove (logs saved: true)",
            "registered in body",
            "registered before body",
        ]
    );
    assert!(ctx.cleanups.is_empty());
}

#[tokio::test]
async fn test_run_in_context_tears_down_after_body_panic() {
    // ARRANGE
    let (suite, dir) = scratch_suite();
    let log: Log = Default::default();
    let deployer = RecordingDeployer {
        log: log.clone(),
        fail_remove: false,
    };
    let mut ctx = TestContext::new(StorageKind::Sql);
    let body_log = log.clone();

    // ACT
    let result = run_in_context(&suite, &mut ctx, Some(&deployer), move |_suite, ctx| {
        async move {
            register_recorded_cleanup(ctx, &body_log, "database");
            if true {
                panic!("api client exploded");
            }
            Ok(())
        }
        .boxed()
    })
    .await;
    tokio::fs::remove_dir_all(&dir).await.ok();

    // ASSERT
    let err = result.expect_err("panic must fail the context");
    assert!(err.to_string().contains("api client exploded"), "got: {}", err);
    assert_eq!(
        *log.lock().expect("lock"),
        vec!["remove (logs saved: true)", "database"]
    );
}

#[tokio::test]
async fn test_run_in_context_reports_removal_failure_after_passing_body() {
    let (suite, dir) = scratch_suite();
    let log: Log = Default::default();
    let deployer = RecordingDeployer {
        log: log.clone(),
        fail_remove: true,
    };
    let mut ctx = TestContext::new(StorageKind::KafkaSql);
    register_recorded_cleanup(&mut ctx, &log, "namespace");

    let result = run_in_context(&suite, &mut ctx, Some(&deployer), |_suite, _ctx| {
        async { Ok(()) }.boxed()
    })
    .await;
    tokio::fs::remove_dir_all(&dir).await.ok();

    assert!(matches!(result, Err(Error::Scenario(ref m)) if m == "registry still there"));
    // Cleanups still ran after the failed removal
    assert_eq!(
        *log.lock().expect("lock"),
        vec!["remove (logs saved: true)", "namespace"]
    );
}

#[tokio::test]
async fn test_run_in_context_without_deployer_runs_cleanups_only() {
    let (suite, dir) = scratch_suite();
    let log: Log = Default::default();
    let mut ctx = TestContext::new(StorageKind::Infinispan).with_id("backup-restore");
    register_recorded_cleanup(&mut ctx, &log, "playground");

    let result = run_in_context(&suite, &mut ctx, None, |_suite, _ctx| async { Ok(()) }.boxed()).await;
    tokio::fs::remove_dir_all(&dir).await.ok();

    assert!(result.is_ok());
    assert_eq!(*log.lock().expect("lock"), vec!["playground"]);
}
