use super::*;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode as AxumStatus};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::{Arc, Mutex};

type Artifacts = Arc<Mutex<Vec<(String, String)>>>;

async fn create(State(store): State<Artifacts>, headers: HeaderMap, body: String) -> AxumStatus {
    let id = headers
        .get("X-Registry-ArtifactId")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_type = headers.get("Content-Type").and_then(|v| v.to_str().ok());
    match (id, content_type) {
        (Some(id), Some(AVRO_CONTENT_TYPE)) => {
            store.lock().expect("lock").push((id, body));
            AxumStatus::OK
        }
        _ => AxumStatus::BAD_REQUEST,
    }
}

async fn list(State(store): State<Artifacts>) -> Json<Vec<String>> {
    Json(store.lock().expect("lock").iter().map(|(id, _)| id.clone()).collect())
}

async fn read(State(store): State<Artifacts>, Path(id): Path<String>) -> (AxumStatus, String) {
    match store.lock().expect("lock").iter().find(|(a, _)| *a == id) {
        Some((_, content)) => (AxumStatus::OK, content.clone()),
        None => (AxumStatus::NOT_FOUND, String::new()),
    }
}

async fn remove(State(store): State<Artifacts>, Path(id): Path<String>) -> AxumStatus {
    let mut store = store.lock().expect("lock");
    let before = store.len();
    store.retain(|(a, _)| *a != id);
    if store.len() < before {
        AxumStatus::NO_CONTENT
    } else {
        AxumStatus::NOT_FOUND
    }
}

/// Serve a fake artifacts API on an ephemeral port
async fn fake_registry() -> (u16, Artifacts) {
    let store: Artifacts = Arc::default();
    let app = Router::new()
        .route("/api/artifacts", get(list).post(create))
        .route("/api/artifacts/{id}", get(read).delete(remove))
        .with_state(store.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (port, store)
}

#[test]
fn test_urls() {
    let client = RegistryClient::new("registry.127.0.0.1.nip.io", 80).expect("client");
    assert_eq!(
        client.artifacts_url(),
        "http://registry.127.0.0.1.nip.io:80/api/artifacts"
    );
    assert_eq!(
        client.artifact_url("bandr-3"),
        "http://registry.127.0.0.1.nip.io:80/api/artifacts/bandr-3"
    );
}

#[test]
fn test_avro_schema_is_a_named_record() {
    let schema: serde_json::Value =
        serde_json::from_str(&avro_schema("upgrd-7")).expect("valid json");
    assert_eq!(schema["type"], "record");
    assert_eq!(schema["name"], "upgrd_7");
}

#[test]
fn test_generated_ids_match_prefix_and_index() {
    assert!(is_generated("bandr-0", "bandr"));
    assert!(is_generated("bandr-49", "bandr"));
    assert!(!is_generated("bandr-x", "bandr"));
    assert!(!is_generated("upgrd-1", "bandr"));
    assert!(!is_generated("bandr", "bandr"));
}

#[tokio::test]
async fn test_create_list_and_delete_artifacts() {
    // ARRANGE
    let (port, store) = fake_registry().await;
    let client = RegistryClient::new("127.0.0.1", port).expect("client");

    // ACT
    client.create_artifacts("bandr", 5).await.expect("create");

    // ASSERT
    assert_eq!(store.lock().expect("lock").len(), 5);
    client.verify_artifacts("bandr", 5).await.expect("verify");
    let content = client.get_artifact("bandr-2").await.expect("get");
    assert!(content.contains("bandr_2"));

    client.delete_artifact("bandr-0").await.expect("delete");
    assert_eq!(client.list_artifacts().await.expect("list").len(), 4);
}

#[tokio::test]
async fn test_verify_fails_on_count_mismatch() {
    // ARRANGE
    let (port, _store) = fake_registry().await;
    let client = RegistryClient::new("127.0.0.1", port).expect("client");
    client.create_artifacts("upgrd", 3).await.expect("create");

    // ACT
    let result = client.verify_artifacts("upgrd", 50).await;

    // ASSERT
    assert!(matches!(result, Err(Error::Scenario(_))));
}

#[tokio::test]
async fn test_unexpected_status_carries_url() {
    let (port, _store) = fake_registry().await;
    let client = RegistryClient::new("127.0.0.1", port).expect("client");

    let err = client.delete_artifact("missing").await.expect_err("404");

    match err {
        Error::UnexpectedStatus { status, url } => {
            assert_eq!(status, 404);
            assert!(url.ends_with("/api/artifacts/missing"));
        }
        other => panic!("unexpected error: {}", other),
    }
}
