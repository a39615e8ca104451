use super::*;
use std::sync::{Arc, Mutex};

fn recorder() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn push(log: &Arc<Mutex<Vec<String>>>, entry: &str) {
    log.lock().expect("lock").push(entry.to_string());
}

fn register_recording(stack: &mut CleanupStack, log: &Arc<Mutex<Vec<String>>>, name: &str, fail: bool) {
    let log = log.clone();
    let entry = name.to_string();
    stack.register(name, move || {
        async move {
            push(&log, &entry);
            if fail {
                Err(Error::scenario(format!("{} failed", entry)))
            } else {
                Ok(())
            }
        }
        .boxed()
    });
}

#[tokio::test]
async fn test_cleanups_run_in_reverse_registration_order() {
    // ARRANGE
    let log = recorder();
    let mut stack = CleanupStack::new();
    for name in ["namespace", "database", "registry"] {
        register_recording(&mut stack, &log, name, false);
    }
    assert_eq!(stack.len(), 3);

    // ACT
    let result = stack.execute().await;

    // ASSERT
    assert!(result.is_ok());
    assert!(stack.is_empty());
    assert_eq!(*log.lock().expect("lock"), vec!["registry", "database", "namespace"]);
}

#[tokio::test]
async fn test_failing_cleanup_does_not_stop_the_rest() {
    // ARRANGE
    let log = recorder();
    let mut stack = CleanupStack::new();
    register_recording(&mut stack, &log, "first", true);
    register_recording(&mut stack, &log, "second", false);
    register_recording(&mut stack, &log, "third", true);

    // ACT
    let result = stack.execute().await;

    // ASSERT: all three ran, both failures reported newest first
    assert_eq!(log.lock().expect("lock").len(), 3);
    match result {
        Err(Error::Cleanup(failures)) => {
            let names: Vec<&str> = failures.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["third", "first"]);
        }
        other => panic!("expected aggregated cleanup error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_panicking_cleanup_is_reported_as_failure() {
    let log = recorder();
    let mut stack = CleanupStack::new();
    register_recording(&mut stack, &log, "after", false);
    stack.register("boom", || {
        async {
            if true {
                panic!("cleanup exploded");
            }
            Ok::<(), Error>(())
        }
        .boxed()
    });

    let result = stack.execute().await;

    assert_eq!(*log.lock().expect("lock"), vec!["after"]);
    let err = result.expect_err("panic must surface");
    assert!(err.to_string().contains("cleanup exploded"), "got: {}", err);
}

#[tokio::test]
async fn test_execute_on_empty_stack_is_ok() {
    let mut stack = CleanupStack::new();
    assert!(stack.execute().await.is_ok());
}

#[test]
fn test_aggregate_failures_keeps_every_failed_step() {
    // ARRANGE
    let results = vec![
        ("delete registry".to_string(), Err(Error::scenario("registry delete timed out"))),
        ("remove database".to_string(), Ok(())),
        ("remove kafka cluster".to_string(), Err(Error::scenario("kafka still there"))),
    ];

    // ACT
    let result = aggregate_failures(results);

    // ASSERT
    match result {
        Err(Error::Cleanup(failures)) => {
            let names: Vec<&str> = failures.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["delete registry", "remove kafka cluster"]);
        }
        other => panic!("expected aggregated error, got {:?}", other),
    }
    assert!(aggregate_failures(vec![("noop".to_string(), Ok(()))]).is_ok());
    assert!(aggregate_failures(Vec::new()).is_ok());
}

#[test]
fn test_first_failure_prefers_body_error() {
    let result = first_failure(
        Err(Error::scenario("body")),
        vec![Err(Error::scenario("teardown")), Ok(())],
    );
    assert!(matches!(result, Err(Error::Scenario(ref m)) if m == "body"));

    let result = first_failure(Ok(()), vec![Ok(()), Err(Error::scenario("teardown"))]);
    assert!(matches!(result, Err(Error::Scenario(ref m)) if m == "teardown"));

    assert!(first_failure(Ok(()), vec![Ok(())]).is_ok());
}

#[test]
fn test_new_context_defaults() {
    let ctx = TestContext::new(StorageKind::KafkaSql);

    assert_eq!(ctx.id, "kafkasql");
    assert_eq!(ctx.namespace, OPERATOR_NAMESPACE);
    assert_eq!(ctx.registry_name, "apicurio-registry-kafkasql");
    assert_eq!(ctx.replicas, 1);
    assert!(ctx.registry_endpoint().is_err());
}

#[test]
fn test_context_builders() {
    let mut ctx = TestContext::new(StorageKind::Sql)
        .with_id("clustered-sql")
        .with_namespace("e2e")
        .with_replicas(3)
        .with_security(KafkaAuth::Tls);
    ctx.registry_host = Some("apicurio-registry-sql.127.0.0.1.nip.io".to_string());
    ctx.registry_port = 80;

    assert_eq!(ctx.id, "clustered-sql");
    assert_eq!(ctx.namespace, "e2e");
    assert_eq!(ctx.replicas, 3);
    assert_eq!(ctx.security, Some(KafkaAuth::Tls));
    assert_eq!(
        ctx.registry_endpoint().expect("endpoint"),
        ("apicurio-registry-sql.127.0.0.1.nip.io", 80)
    );
}
