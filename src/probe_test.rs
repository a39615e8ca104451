use super::*;
use crate::storage::StorageKind;
use axum::extract::Form;
use axum::http::{HeaderMap, StatusCode as AxumStatus};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::HashMap;
use std::path::PathBuf;

const GOOD_TOKEN: &str = "issued-token";

async fn token(Form(form): Form<HashMap<String, String>>) -> (AxumStatus, Json<serde_json::Value>) {
    let valid = form.get("grant_type").map(String::as_str) == Some("password")
        && form.get("client_id").map(String::as_str) == Some("registry-client-api")
        && form.get("password").map(String::as_str) == Some("changeme");
    if valid {
        (
            AxumStatus::OK,
            Json(serde_json::json!({ "access_token": GOOD_TOKEN, "token_type": "Bearer" })),
        )
    } else {
        (AxumStatus::UNAUTHORIZED, Json(serde_json::json!({ "error": "invalid_grant" })))
    }
}

async fn secured_artifacts(headers: HeaderMap) -> (AxumStatus, Json<Vec<String>>) {
    let bearer = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if bearer == Some(GOOD_TOKEN) {
        (AxumStatus::OK, Json(Vec::new()))
    } else {
        (AxumStatus::UNAUTHORIZED, Json(Vec::new()))
    }
}

/// Fake Keycloak token endpoint plus a secured artifacts API
async fn fake_secured_registry() -> u16 {
    let app = Router::new()
        .route("/auth/realms/registry/protocol/openid-connect/token", post(token))
        .route("/api/artifacts", get(secured_artifacts));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(async move { axum::serve(listener, app).await });
    port
}

fn deployed_context(port: u16) -> TestContext {
    let mut ctx = TestContext::new(StorageKind::Sql);
    ctx.registry_host = Some("127.0.0.1".to_string());
    ctx.registry_port = port;
    ctx
}

fn test_config() -> SuiteConfig {
    SuiteConfig::from_lookup(|key| match key {
        "E2E_SUITE_PROJECT_DIR" => Some("/work/suite".to_string()),
        "E2E_APICURIO_PROJECT_DIR" => Some("/work/apicurio-registry".to_string()),
        "E2E_EXTRA_MAVEN_ARGS" => Some("-Dgroups=smoke -X".to_string()),
        _ => None,
    })
    .expect("config")
}

fn env_value<'a>(cmd: &'a Cmd, key: &str) -> Option<&'a str> {
    cmd.env
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[tokio::test]
async fn test_basic_probe_passes_once_artifacts_answer() {
    // ARRANGE
    let app = Router::new().route("/api/artifacts", get(|| async { Json(Vec::<String>::new()) }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(async move { axum::serve(listener, app).await });

    // ACT
    let result = basic_api_probe(&deployed_context(port)).await;

    // ASSERT
    assert!(result.is_ok(), "probe failed: {:?}", result);
}

#[tokio::test]
async fn test_basic_probe_requires_a_deployed_registry() {
    let err = basic_api_probe(&TestContext::new(StorageKind::Sql))
        .await
        .expect_err("no host yet");
    assert!(matches!(err, Error::MissingField(_)));
}

#[tokio::test]
async fn test_wait_for_status_times_out_on_wrong_status() {
    // ARRANGE
    let port = fake_secured_registry().await;

    // ACT
    let err = wait_for_status(
        &artifacts_url("127.0.0.1", port),
        None,
        StatusCode::OK,
        Duration::from_millis(300),
    )
    .await
    .expect_err("anonymous requests are rejected");

    // ASSERT
    assert!(matches!(err, Error::Timeout { .. }));
}

#[tokio::test]
async fn test_token_is_issued_for_valid_credentials() {
    let port = fake_secured_registry().await;
    let info = KeycloakInfo::new(&format!("http://127.0.0.1:{}", port), "e2e");

    let token = issue_access_token(&info.token_url(), &info.api_client_id, "registry-admin", "changeme")
        .await
        .expect("token");

    assert_eq!(token, GOOD_TOKEN);
}

#[tokio::test]
async fn test_token_request_with_bad_password_is_unexpected_status() {
    let port = fake_secured_registry().await;
    let info = KeycloakInfo::new(&format!("http://127.0.0.1:{}", port), "e2e");

    let err = issue_access_token(&info.token_url(), &info.api_client_id, "registry-admin", "wrong")
        .await
        .expect_err("bad credentials");

    match err {
        Error::UnexpectedStatus { status, url } => {
            assert_eq!(status, 401);
            assert!(url.ends_with("/auth/realms/registry/protocol/openid-connect/token"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_auth_probe_accepts_token_and_rejects_bogus_bearer() {
    // ARRANGE
    let port = fake_secured_registry().await;
    let mut ctx = deployed_context(port);
    ctx.keycloak = Some(KeycloakInfo::new(&format!("http://127.0.0.1:{}", port), "e2e"));

    // ACT
    let result = auth_api_probe(&ctx, "registry-developer", "changeme").await;

    // ASSERT
    assert!(result.is_ok(), "probe failed: {:?}", result);
}

#[tokio::test]
async fn test_auth_probe_without_keycloak_is_missing_field() {
    let err = auth_api_probe(&deployed_context(1), "registry-user", "changeme")
        .await
        .expect_err("no keycloak");
    assert!(matches!(err, Error::MissingField(_)));
}

#[test]
fn test_functional_command_arguments() {
    // ARRANGE
    let config = test_config();
    let ctx = TestContext::new(StorageKind::KafkaSql);

    // ACT
    let cmd = functional_tests_command(&config, None, None, &ctx);

    // ASSERT
    assert_eq!(cmd.program, "mvn");
    assert_eq!(
        cmd.args,
        vec![
            "verify",
            "-Psmoke",
            "-Pkafkasql",
            "-Pintegration-tests",
            "-pl",
            "integration-tests/testsuite",
            "-am",
            "-Dmaven.javadoc.skip=true",
            "-Dstyle.color=always",
            "-DtrimStackTrace=false",
            "--no-transfer-progress",
            "-Dgroups=smoke",
            "-X",
        ]
    );
    assert_eq!(cmd.current_dir, Some(PathBuf::from("/work/apicurio-registry")));
    assert_eq!(env_value(&cmd, "EXTERNAL_REGISTRY"), Some("true"));
    assert_eq!(env_value(&cmd, "REGISTRY_HOST"), None);
}

#[test]
fn test_functional_command_environment_for_deployed_registry() {
    // ARRANGE
    let config = test_config();
    let mut ctx = TestContext::new(StorageKind::Sql);
    ctx.registry_host = Some("apicurio-registry-sql.127.0.0.1.nip.io".to_string());
    ctx.registry_port = 80;
    ctx.registry_internal_host = Some("apicurio-registry-sql-service.e2e".to_string());
    ctx.registry_internal_port = 8080;
    ctx.functional_profile = Some("migration".to_string());
    ctx.extra_env.push(("SOURCE_REGISTRY_HOST".to_string(), "source".to_string()));
    let selenium = SeleniumInfo {
        host: "selenium-chrome.127.0.0.1.nip.io".to_string(),
        port: 80,
    };

    // ACT
    let cmd = functional_tests_command(&config, Some(&selenium), None, &ctx);

    // ASSERT
    assert_eq!(cmd.args[1], "-Pmigration");
    assert_eq!(env_value(&cmd, "REGISTRY_HOST"), Some("apicurio-registry-sql.127.0.0.1.nip.io"));
    assert_eq!(env_value(&cmd, "REGISTRY_PORT"), Some("80"));
    assert_eq!(env_value(&cmd, "SELENIUM_HOST"), Some("selenium-chrome.127.0.0.1.nip.io"));
    assert_eq!(env_value(&cmd, "REGISTRY_SELENIUM_HOST"), Some("apicurio-registry-sql-service.e2e"));
    assert_eq!(env_value(&cmd, "REGISTRY_SELENIUM_PORT"), Some("8080"));
    assert_eq!(env_value(&cmd, "SOURCE_REGISTRY_HOST"), Some("source"));
    assert_eq!(env_value(&cmd, "KAFKA_BOOTSTRAP_SERVERS"), None);
}
