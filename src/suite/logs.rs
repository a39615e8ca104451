//! Log capture into the per-run log tree
//!
//! Layout under `<suite_dir>/tests-logs/<suite_id>/`:
//! `operator/namespaces/<ns>/<pod>.log` for the operator, and
//! `<scenario>/namespaces/<ns>/` holding `pods.log`, `events.log` and one
//! `<pod>-<container>.log` per running container.

use crate::cmd::KubeCli;
use crate::config::OPERATOR_DEPLOYMENT_NAME;
use crate::error::Result;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams};
use kube::Client;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub fn operator_logs_dir(logs_dir: &Path, namespace: &str) -> PathBuf {
    logs_dir.join("operator").join("namespaces").join(namespace)
}

pub fn scenario_logs_dir(logs_dir: &Path, scenario: &str, namespace: &str) -> PathBuf {
    logs_dir.join(scenario).join("namespaces").join(namespace)
}

/// `a=b,c=d` from a label map
fn selector(labels: &std::collections::BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Running")
}

/// Store the logs of every operator pod
///
/// Skipped when the operator Deployment is missing or has no available
/// replica.
pub async fn save_operator_logs(client: &Client, logs_dir: &Path, namespace: &str) -> Result<()> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let Some(deployment) = deployments.get_opt(OPERATOR_DEPLOYMENT_NAME).await? else {
        info!(namespace = %namespace, "Operator deployment not found, skipping operator logs");
        return Ok(());
    };
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    if available == 0 {
        info!(namespace = %namespace, "Operator deployment not ready, skipping operator logs");
        return Ok(());
    }
    let Some(labels) = deployment.spec.and_then(|s| s.selector.match_labels) else {
        return Ok(());
    };

    let dir = operator_logs_dir(logs_dir, namespace);
    tokio::fs::create_dir_all(&dir).await?;

    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let list = pods.list(&ListParams::default().labels(&selector(&labels))).await?;
    for pod in list.items {
        let Some(name) = pod.metadata.name.as_deref() else {
            continue;
        };
        let file = dir.join(format!("{}.log", name));
        let content = pods.logs(name, &LogParams::default()).await?;
        info!(file = %file.display(), "Storing operator logs");
        tokio::fs::write(&file, content).await?;
    }
    Ok(())
}

/// Store pod listings, events and container logs of one namespace
pub async fn save_namespace_logs(
    client: &Client,
    cli: &KubeCli,
    logs_dir: &Path,
    scenario: &str,
    namespace: &str,
) -> Result<()> {
    let dir = scenario_logs_dir(logs_dir, scenario, namespace);
    info!(scenario = %scenario, namespace = %namespace, dir = %dir.display(), "Collecting logs");
    tokio::fs::create_dir_all(&dir).await?;

    let mut pods_log = cli.output(&["get", "pods", "-n", namespace]).await?;
    pods_log.push_str(&cli.output(&["get", "pods", "-n", namespace, "-o", "yaml"]).await?);
    tokio::fs::write(dir.join("pods.log"), pods_log).await?;

    let events = cli
        .output(&[
            "get",
            "events",
            "-n",
            namespace,
            "--sort-by={.metadata.creationTimestamp}",
        ])
        .await?;
    tokio::fs::write(dir.join("events.log"), events).await?;

    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    for pod in pods.list(&ListParams::default()).await?.items {
        let Some(name) = pod.metadata.name.as_deref() else {
            continue;
        };
        if !is_running(&pod) {
            info!(pod = %name, "Pod not running, skipping its logs");
            continue;
        }
        let containers = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| statuses.iter().map(|c| c.name.clone()).collect::<Vec<_>>())
            .unwrap_or_default();
        for container in containers {
            let params = LogParams {
                container: Some(container.clone()),
                ..Default::default()
            };
            match pods.logs(name, &params).await {
                Ok(content) => {
                    let file = dir.join(format!("{}-{}.log", name, container));
                    tokio::fs::write(&file, content).await?;
                }
                Err(e) => warn!(pod = %name, container = %container, error = %e, "Failed to read container logs"),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "logs_test.rs"]
mod tests;
