//! Probes against a deployed registry
//!
//! API probes poll the artifacts endpoint until it answers with the
//! expected status. The functional probe hands the registry to the Maven
//! integration testsuite.

use crate::cmd::Cmd;
use crate::config::SuiteConfig;
use crate::context::TestContext;
use crate::error::{Error, Result};
use crate::kafka::KafkaClusterInfo;
use crate::keycloak::KeycloakInfo;
use crate::suite::selenium::SeleniumInfo;
use crate::suite::SuiteContext;
use crate::wait::Poller;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const API_READY_TIMEOUT: Duration = Duration::from_secs(60);
const UNAUTHORIZED_TIMEOUT: Duration = Duration::from_secs(20);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

const INVALID_TOKEN: &str = "foo";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// Poll `url` until it answers `expected`
///
/// Transport errors count as not ready: the ingress may not route yet.
pub(crate) async fn wait_for_status(
    url: &str,
    bearer: Option<&str>,
    expected: StatusCode,
    timeout: Duration,
) -> Result<()> {
    let http = http_client()?;
    Poller::new(timeout)
        .with_interval(PROBE_INTERVAL)
        .until(&format!("{} from {}", expected, url), || {
            let mut request = http.get(url);
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }
            async move {
                match request.send().await {
                    Ok(response) => {
                        debug!(url = %url, status = %response.status(), "Probe response");
                        Ok(response.status() == expected)
                    }
                    Err(e) => {
                        debug!(url = %url, error = %e, "Probe request failed");
                        Ok(false)
                    }
                }
            }
        })
        .await
}

fn artifacts_url(host: &str, port: u16) -> String {
    format!("http://{}:{}/api/artifacts", host, port)
}

/// Wait until the registry answers its artifacts endpoint
pub async fn basic_api_probe(ctx: &TestContext) -> Result<()> {
    let (host, port) = ctx.registry_endpoint()?;
    info!(scenario = %ctx.id, host = %host, port, "Running basic API probe");
    wait_for_status(&artifacts_url(host, port), None, StatusCode::OK, API_READY_TIMEOUT).await
}

/// Password-grant access token from the realm's token endpoint
pub async fn issue_access_token(
    token_url: &str,
    client_id: &str,
    user: &str,
    password: &str,
) -> Result<String> {
    let http = http_client()?;
    let response = http
        .post(token_url)
        .form(&[
            ("grant_type", "password"),
            ("client_id", client_id),
            ("username", user),
            ("password", password),
        ])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::UnexpectedStatus {
            status: status.as_u16(),
            url: token_url.to_string(),
        });
    }
    Ok(response.json::<TokenResponse>().await?.access_token)
}

/// Authenticated probe against a Keycloak-secured registry
///
/// A valid token must be accepted, then a bogus one rejected with 401.
pub async fn auth_api_probe(ctx: &TestContext, user: &str, password: &str) -> Result<()> {
    let keycloak = ctx
        .keycloak
        .as_ref()
        .ok_or_else(|| Error::MissingField(format!("keycloak for {}", ctx.id)))?;
    let (host, port) = ctx.registry_endpoint()?;
    authenticated_probe(keycloak, &artifacts_url(host, port), user, password).await
}

pub(crate) async fn authenticated_probe(
    keycloak: &KeycloakInfo,
    url: &str,
    user: &str,
    password: &str,
) -> Result<()> {
    info!(user = %user, url = %url, "Running authenticated API probe");
    let token = issue_access_token(&keycloak.token_url(), &keycloak.api_client_id, user, password).await?;

    wait_for_status(url, Some(&token), StatusCode::OK, API_READY_TIMEOUT).await?;
    wait_for_status(url, Some(INVALID_TOKEN), StatusCode::UNAUTHORIZED, UNAUTHORIZED_TIMEOUT).await
}

/// Maven invocation running the registry's integration testsuite
///
/// The command runs in the registry checkout. Registry and Selenium
/// endpoints are passed as environment, followed by the context's own
/// extra variables.
pub fn functional_tests_command(
    config: &SuiteConfig,
    selenium: Option<&SeleniumInfo>,
    shared_kafka: Option<&KafkaClusterInfo>,
    ctx: &TestContext,
) -> Cmd {
    let profile = ctx
        .functional_profile
        .as_deref()
        .unwrap_or_else(|| config.effective_tests_profile());

    let mut cmd = Cmd::new("mvn")
        .arg("verify")
        .arg(format!("-P{}", profile))
        .arg(format!("-P{}", ctx.storage))
        .args([
            "-Pintegration-tests",
            "-pl",
            "integration-tests/testsuite",
            "-am",
            "-Dmaven.javadoc.skip=true",
            "-Dstyle.color=always",
            "-DtrimStackTrace=false",
            "--no-transfer-progress",
        ])
        .args(config.extra_maven_args.iter().cloned())
        .current_dir(&config.apicurio_project_dir)
        .env("EXTERNAL_REGISTRY", "true");

    if let Some(host) = &ctx.registry_host {
        cmd = cmd
            .env("REGISTRY_HOST", host)
            .env("REGISTRY_PORT", ctx.registry_port.to_string());
        if let Some(selenium) = selenium {
            cmd = cmd
                .env("SELENIUM_HOST", &selenium.host)
                .env("SELENIUM_PORT", selenium.port.to_string());
        }
        if let Some(internal) = &ctx.registry_internal_host {
            cmd = cmd
                .env("REGISTRY_SELENIUM_HOST", internal)
                .env("REGISTRY_SELENIUM_PORT", ctx.registry_internal_port.to_string());
        }
    }

    if let Some(bootstrap) = shared_kafka.and_then(|k| k.external_bootstrap_servers.as_deref()) {
        cmd = cmd.env("KAFKA_BOOTSTRAP_SERVERS", bootstrap);
    }

    for (key, value) in &ctx.extra_env {
        cmd = cmd.env(key, value);
    }
    cmd
}

/// Run the functional testsuite against the context's registry
pub async fn execute_functional_tests(suite: &SuiteContext, ctx: &TestContext) -> Result<()> {
    let cmd = functional_tests_command(
        &suite.config,
        suite.selenium.as_ref(),
        suite.shared_kafka.as_deref(),
        ctx,
    );
    info!(scenario = %ctx.id, command = %cmd.display(), "Running functional tests");
    cmd.run().await.map(|_| ()).map_err(|e| match e {
        Error::Command { .. } => Error::scenario(format!("There are test failures in {}: {}", ctx.id, e)),
        other => other,
    })
}

#[cfg(test)]
#[path = "probe_test.rs"]
mod tests;
