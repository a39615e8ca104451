use super::*;
use std::collections::HashMap;

fn config_from(vars: &[(&str, &str)]) -> Result<SuiteConfig> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    SuiteConfig::from_lookup(|key| map.get(key).cloned())
}

#[test]
fn test_defaults_when_environment_is_empty() {
    // ARRANGE + ACT
    let config = config_from(&[(env::SUITE_PROJECT_DIR, "/suite")]).expect("config");

    // ASSERT
    assert_eq!(config.suite_project_dir, PathBuf::from("/suite"));
    assert_eq!(
        config.apicurio_project_dir,
        PathBuf::from("/suite/apicurio-registry")
    );
    assert_eq!(config.olm.catalog_source_namespace, "olm");
    assert_eq!(config.olm.package_manifest_name, "apicurio-registry");
    assert_eq!(config.effective_tests_profile(), "smoke");
    assert!(config.pull_secret.is_none());
    assert!(config.extra_maven_args.is_empty());
    assert!(!config.olm.upgrade.is_complete());
}

#[test]
fn test_empty_values_count_as_unset() {
    let config = config_from(&[
        (env::SUITE_PROJECT_DIR, "/suite"),
        (env::APICURIO_TESTS_PROFILE, "  "),
        (env::OLM_CHANNEL, ""),
    ])
    .expect("config");

    assert_eq!(config.tests_profile, None);
    assert_eq!(config.olm.channel, None);
}

#[test]
fn test_pull_secret_requires_all_three_values() {
    let partial = config_from(&[
        (env::SUITE_PROJECT_DIR, "/suite"),
        (env::PULL_SECRET_SERVER, "quay.io"),
    ]);
    assert!(matches!(partial, Err(Error::Config(_))));

    let full = config_from(&[
        (env::SUITE_PROJECT_DIR, "/suite"),
        (env::PULL_SECRET_SERVER, "quay.io"),
        (env::PULL_SECRET_USER, "bot"),
        (env::PULL_SECRET_PASSWORD, "s3cret"),
    ])
    .expect("config");
    assert_eq!(
        full.pull_secret,
        Some(PullSecretCredentials {
            server: "quay.io".to_string(),
            user: "bot".to_string(),
            password: "s3cret".to_string(),
        })
    );
}

#[test]
fn test_extra_maven_args_are_split_on_whitespace() {
    let config = config_from(&[
        (env::SUITE_PROJECT_DIR, "/suite"),
        (env::EXTRA_MAVEN_ARGS, "-DskipUiTests  -Dquarkus.log.level=DEBUG"),
    ])
    .expect("config");

    assert_eq!(
        config.extra_maven_args,
        vec!["-DskipUiTests", "-Dquarkus.log.level=DEBUG"]
    );
}

#[test]
fn test_shared_kafka_and_selenium_follow_profile() {
    let serdes = config_from(&[
        (env::SUITE_PROJECT_DIR, "/suite"),
        (env::APICURIO_TESTS_PROFILE, "serdes"),
    ])
    .expect("config");
    assert!(serdes.needs_shared_kafka());
    assert!(!serdes.needs_selenium(&Flags::default()));

    let ui = config_from(&[
        (env::SUITE_PROJECT_DIR, "/suite"),
        (env::APICURIO_TESTS_PROFILE, "ui"),
    ])
    .expect("config");
    assert!(!ui.needs_shared_kafka());
    assert!(ui.needs_selenium(&Flags::default()));

    let smoke = config_from(&[(env::SUITE_PROJECT_DIR, "/suite")]).expect("config");
    let flags = Flags {
        setup_selenium: true,
        ..Flags::default()
    };
    assert!(smoke.needs_selenium(&flags));
}

#[test]
fn test_upgrade_config_complete() {
    let config = config_from(&[
        (env::SUITE_PROJECT_DIR, "/suite"),
        (env::OLM_UPGRADE_CHANNEL, "2.x"),
        (env::OLM_UPGRADE_OLD_CATALOG, "old-catalog"),
        (env::OLM_UPGRADE_OLD_CATALOG_NAMESPACE, "olm"),
        (env::OLM_UPGRADE_OLD_CSV, "apicurio-registry.v1"),
        (env::OLM_UPGRADE_NEW_CSV, "apicurio-registry.v2"),
    ])
    .expect("config");

    assert!(config.olm.upgrade.is_complete());
}

#[test]
fn test_logs_dir_is_keyed_by_suite_id() {
    let config = config_from(&[(env::SUITE_PROJECT_DIR, "/suite")]).expect("config");
    assert_eq!(
        config.logs_dir("run-1"),
        PathBuf::from("/suite/tests-logs/run-1")
    );
}
