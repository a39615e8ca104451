//! In-cluster smoke run of the suite
//!
//! Needs a reachable cluster and the E2E_* environment. Run with:
//! E2E_RUN_CLUSTER_TESTS=1 cargo test --test cluster_test -- --ignored

#![allow(clippy::expect_used)]

mod cluster;

use cluster::ClusterTestConfig;
use registry_e2e::suite::runner::Outcome;
use registry_e2e::{Suite, SuiteConfig};

#[test]
fn test_cluster_config_parses() {
    let config = ClusterTestConfig::load().expect("Failed to load cluster test config");

    let flags = config.flags().expect("Invalid flags");

    assert_eq!(flags.suite_id.as_deref(), Some("cluster-test"));
    assert_eq!(flags.focus.as_deref(), Some("infinispan"));
    assert!(flags.only_test_operator);
}

#[tokio::test]
#[ignore]
async fn run_suite_against_cluster() {
    if std::env::var("E2E_RUN_CLUSTER_TESTS").is_err() {
        eprintln!("E2E_RUN_CLUSTER_TESTS not set, skipping");
        return;
    }
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let config = ClusterTestConfig::load().expect("Failed to load cluster test config");
    let flags = config.flags().expect("Invalid flags");
    let suite_config = SuiteConfig::from_env().expect("Invalid suite environment");

    let suite = Suite::bootstrap(suite_config, flags)
        .await
        .expect("Suite bootstrap failed");
    let report = suite.run().await;
    let teardown = suite.teardown().await;

    for result in &report.results {
        if let Outcome::Failed(message) = &result.outcome {
            eprintln!("{} failed: {}", result.name, message);
        }
    }
    teardown.expect("Suite teardown failed");
    assert!(report.passed() > 0, "focus matched no scenario");
    assert!(report.succeeded(), "{} scenario(s) failed", report.failed());
}
