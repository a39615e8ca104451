//! REST client for a deployed registry
//!
//! Only the artifact endpoints the scenarios touch are covered.

use crate::error::{Error, Result};
use reqwest::{Response, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Content type for Avro artifacts
pub const AVRO_CONTENT_TYPE: &str = "application/json; artifactType=AVRO";

#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    http: reqwest::Client,
    bearer_token: Option<String>,
}

impl RegistryClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: format!("http://{}:{}", host, port),
            http,
            bearer_token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` on every request
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn artifacts_url(&self) -> String {
        format!("{}/api/artifacts", self.base_url)
    }

    pub fn artifact_url(&self, id: &str) -> String {
        format!("{}/api/artifacts/{}", self.base_url, id)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    pub async fn create_artifact(&self, id: &str, content: &str) -> Result<()> {
        let url = self.artifacts_url();
        debug!(artifact = %id, "Creating artifact");
        let response = self
            .authorize(self.http.post(&url))
            .header("Content-Type", AVRO_CONTENT_TYPE)
            .header("X-Registry-ArtifactId", id)
            .body(content.to_string())
            .send()
            .await?;
        expect_status(response, StatusCode::OK, &url).await.map(|_| ())
    }

    pub async fn get_artifact(&self, id: &str) -> Result<String> {
        let url = self.artifact_url(id);
        let response = self.authorize(self.http.get(&url)).send().await?;
        Ok(expect_status(response, StatusCode::OK, &url).await?.text().await?)
    }

    /// Ids of every artifact in the registry
    pub async fn list_artifacts(&self) -> Result<Vec<String>> {
        let url = self.artifacts_url();
        let response = self.authorize(self.http.get(&url)).send().await?;
        Ok(expect_status(response, StatusCode::OK, &url)
            .await?
            .json::<Vec<String>>()
            .await?)
    }

    pub async fn delete_artifact(&self, id: &str) -> Result<()> {
        let url = self.artifact_url(id);
        let response = self.authorize(self.http.delete(&url)).send().await?;
        expect_status(response, StatusCode::NO_CONTENT, &url)
            .await
            .map(|_| ())
    }

    /// Create `count` Avro artifacts named `<prefix>-<i>`
    pub async fn create_artifacts(&self, prefix: &str, count: usize) -> Result<()> {
        info!(prefix = %prefix, count, "Creating artifacts");
        for i in 0..count {
            let id = artifact_id(prefix, i);
            self.create_artifact(&id, &avro_schema(&id)).await?;
        }
        Ok(())
    }

    /// Check that exactly the `<prefix>-<i>` artifacts are present
    pub async fn verify_artifacts(&self, prefix: &str, count: usize) -> Result<()> {
        let listed = self.list_artifacts().await?;
        let matching = listed.iter().filter(|id| is_generated(id, prefix)).count();
        info!(prefix = %prefix, expected = count, found = matching, total = listed.len(), "Verifying artifacts");

        if listed.len() != count || matching != count {
            return Err(Error::scenario(format!(
                "expected {} artifacts with prefix {}, registry lists {} ({} matching)",
                count,
                prefix,
                listed.len(),
                matching
            )));
        }
        for i in 0..count {
            self.get_artifact(&artifact_id(prefix, i)).await?;
        }
        Ok(())
    }
}

pub fn artifact_id(prefix: &str, index: usize) -> String {
    format!("{}-{}", prefix, index)
}

fn is_generated(id: &str, prefix: &str) -> bool {
    id.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
        .is_some_and(|n| n.parse::<usize>().is_ok())
}

/// Minimal Avro record schema named after the artifact
pub fn avro_schema(name: &str) -> String {
    json!({
        "type": "record",
        "name": name.replace('-', "_"),
        "fields": [
            {"name": "foo", "type": "string"}
        ]
    })
    .to_string()
}

async fn expect_status(response: Response, expected: StatusCode, url: &str) -> Result<Response> {
    if response.status() == expected {
        Ok(response)
    } else {
        Err(Error::UnexpectedStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        })
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
