//! Strimzi broker operator install / removal
//!
//! The operator is installed at most once per namespace. Whoever installs
//! it gets a `StrimziInstallation` back and is the only one allowed to
//! remove it.

use super::manifests::rewrite_namespace;
use crate::error::{is_not_found, Error, Result};
use crate::k8s;
use crate::olm::{self, ObjectRef, SubscriptionRequest};
use crate::suite::SuiteContext;
use crate::wait::Poller;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, ListParams};
use kube::core::DynamicObject;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

pub const STRIMZI_DEPLOYMENT_PREFIX: &str = "strimzi-cluster-operator";

const BUNDLE_READY_TIMEOUT: Duration = Duration::from_secs(120);
const OLM_READY_TIMEOUT: Duration = Duration::from_secs(180);
const REMOVED_TIMEOUT: Duration = Duration::from_secs(120);

/// How this run installed the broker operator
#[derive(Debug, PartialEq, Eq)]
pub enum StrimziInstallation {
    /// Rendered bundle YAML, kept so the exact same objects are deleted
    Bundle { namespace: String, manifest: String },
    Olm {
        namespace: String,
        subscription: ObjectRef,
        operator_group: Option<ObjectRef>,
    },
}

/// Subscription coordinates of the broker operator package
pub fn strimzi_subscription_source(is_openshift: bool) -> (&'static str, &'static str, &'static str) {
    // (package, catalog source, catalog namespace)
    if is_openshift {
        ("amq-streams", "redhat-operators", "openshift-marketplace")
    } else {
        ("strimzi-kafka-operator", "operatorhubio-catalog", "olm")
    }
}

pub fn operator_group_name(namespace: &str) -> String {
    format!("{}-operator-group", namespace)
}

fn has_available_replicas(d: &Deployment) -> bool {
    d.status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
        > 0
}

/// Install the broker operator unless one is already running
///
/// # Returns
/// `None` when an operator was found, otherwise what was installed.
pub async fn ensure_strimzi_operator(
    suite: &SuiteContext,
    namespace: &str,
) -> Result<Option<StrimziInstallation>> {
    if let Some(existing) =
        k8s::find_deployment_by_prefix(&suite.client, namespace, STRIMZI_DEPLOYMENT_PREFIX).await?
    {
        info!(
            deployment = ?existing.metadata.name,
            namespace = %namespace,
            "Strimzi operator is already deployed"
        );
        return Ok(None);
    }

    let (installation, timeout) = if suite.flags.install_strimzi_olm {
        (install_with_olm(suite, namespace).await?, OLM_READY_TIMEOUT)
    } else {
        (install_bundle(suite, namespace).await?, BUNDLE_READY_TIMEOUT)
    };

    if let Err(e) = wait_for_strimzi_ready(suite, namespace, timeout).await {
        if let Err(removal) = remove_strimzi_operator(suite, installation).await {
            error!(error = %removal, "Failed to remove strimzi operator after failed install");
        }
        return Err(e);
    }
    Ok(Some(installation))
}

/// Read the bundle from an https URL, a single file or a directory
async fn load_bundle(location: &str, namespace: &str) -> Result<String> {
    if location.starts_with("https://") || location.starts_with("http://") {
        info!(url = %location, "Downloading strimzi bundle");
        let body = reqwest::get(location).await?.error_for_status()?.text().await?;
        return Ok(rewrite_namespace(&body, namespace));
    }

    let path = Path::new(location);
    if path.is_file() {
        return Ok(tokio::fs::read_to_string(path).await?);
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".yaml") || name.ends_with(".yml") {
            files.push((name, entry.path()));
        }
    }
    files.sort();

    let mut docs = Vec::with_capacity(files.len());
    for (name, file) in files {
        let content = tokio::fs::read_to_string(&file).await?;
        // Only the role bindings carry the operator's own namespace
        if name.contains("RoleBinding") {
            docs.push(rewrite_namespace(&content, namespace));
        } else {
            docs.push(content);
        }
    }
    Ok(docs.join("\n---\n"))
}

async fn install_bundle(suite: &SuiteContext, namespace: &str) -> Result<StrimziInstallation> {
    let location = suite.config.strimzi_bundle_path.as_deref().ok_or_else(|| {
        Error::Config(format!(
            "{} must be set unless --install-strimzi-olm is used",
            crate::config::env::STRIMZI_BUNDLE_PATH
        ))
    })?;

    info!(namespace = %namespace, bundle = %location, "Deploying strimzi operator");
    let manifest = load_bundle(location, namespace).await?;
    suite.cli.apply_yaml(namespace, &manifest).await?;

    Ok(StrimziInstallation::Bundle {
        namespace: namespace.to_string(),
        manifest,
    })
}

async fn install_with_olm(suite: &SuiteContext, namespace: &str) -> Result<StrimziInstallation> {
    let client = &suite.client;
    let group_name = operator_group_name(namespace);

    let operator_group = if olm::any_operator_group_exists(client, namespace).await? {
        info!(namespace = %namespace, "Skipping operator group creation because it already exists");
        None
    } else {
        olm::create_operator_group(client, namespace, &group_name).await?;
        Some(ObjectRef::new(&group_name, namespace))
    };

    let (package, catalog, catalog_ns) = strimzi_subscription_source(suite.is_openshift);
    let manifests: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), catalog_ns, &olm::package_manifest_resource());
    let manifest = manifests.get(package).await?;
    let (channel, csv) = olm::resolve_channel(Some(&manifest), None, None)?;

    let request = SubscriptionRequest {
        name: package.to_string(),
        namespace: namespace.to_string(),
        package: package.to_string(),
        catalog_source: catalog.to_string(),
        catalog_source_namespace: catalog_ns.to_string(),
        channel,
        starting_csv: csv,
    };
    olm::create_subscription(client, &request).await?;

    Ok(StrimziInstallation::Olm {
        namespace: namespace.to_string(),
        subscription: ObjectRef::new(package, namespace),
        operator_group,
    })
}

async fn wait_for_strimzi_ready(suite: &SuiteContext, namespace: &str, timeout: Duration) -> Result<()> {
    let deployments: Api<Deployment> = Api::namespaced(suite.client.clone(), namespace);
    let result = Poller::new(timeout)
        .until(&format!("{}* in {}", STRIMZI_DEPLOYMENT_PREFIX, namespace), || {
            let deployments = deployments.clone();
            async move {
                let list = deployments.list(&ListParams::default()).await?;
                Ok(list.items.iter().any(|d| {
                    d.metadata
                        .name
                        .as_deref()
                        .is_some_and(|n| n.starts_with(STRIMZI_DEPLOYMENT_PREFIX))
                        && has_available_replicas(d)
                }))
            }
        })
        .await;
    k8s::surface_with_diagnostics(&suite.cli, namespace, result).await
}

/// Remove an operator this run installed and wait for it to go away
pub async fn remove_strimzi_operator(suite: &SuiteContext, installation: StrimziInstallation) -> Result<()> {
    let namespace = match &installation {
        StrimziInstallation::Bundle { namespace, manifest } => {
            info!(namespace = %namespace, "Removing strimzi operator bundle");
            suite.cli.delete_yaml(namespace, manifest).await?;
            namespace.clone()
        }
        StrimziInstallation::Olm {
            namespace,
            subscription,
            operator_group,
        } => {
            info!(namespace = %namespace, "Removing strimzi operator subscription");
            let subs: Api<DynamicObject> = Api::namespaced_with(
                suite.client.clone(),
                &subscription.namespace,
                &olm::subscription_resource(),
            );
            let csv = match subs.get_opt(&subscription.name).await {
                Ok(found) => found
                    .as_ref()
                    .and_then(olm::subscription_current_csv)
                    .map(str::to_string),
                Err(e) if is_not_found(&e) => None,
                Err(e) => return Err(e.into()),
            };
            olm::delete_subscription(&suite.client, subscription, csv.as_deref(), false).await?;
            if let Some(group) = operator_group {
                olm::delete_operator_group(&suite.client, &group.namespace, &group.name).await?;
            }
            namespace.clone()
        }
    };

    let deployments: Api<Deployment> = Api::namespaced(suite.client.clone(), &namespace);
    let result = Poller::new(REMOVED_TIMEOUT)
        .until(&format!("{}* removal in {}", STRIMZI_DEPLOYMENT_PREFIX, namespace), || {
            let deployments = deployments.clone();
            async move {
                let list = match deployments.list(&ListParams::default()).await {
                    Ok(list) => list,
                    Err(e) if is_not_found(&e) => return Ok(true),
                    Err(e) => return Err(e.into()),
                };
                Ok(!list.items.iter().any(|d| {
                    d.metadata
                        .name
                        .as_deref()
                        .is_some_and(|n| n.starts_with(STRIMZI_DEPLOYMENT_PREFIX))
                }))
            }
        })
        .await;
    k8s::surface_with_diagnostics(&suite.cli, &namespace, result).await
}
