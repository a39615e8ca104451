//! Operator Lifecycle Manager install / uninstall
//!
//! Install walks a fixed sequence of states:
//!
//! `NoCatalog -> CatalogCreated -> CatalogReady -> OperatorGroupCreated ->
//! PackageManifestResolved -> SubscriptionCreated -> OperatorDeploymentReady`
//!
//! Uninstall is the reverse (Subscription, CSV, OperatorGroup, CatalogSource,
//! namespace) and only touches what install recorded as created.

mod resources;

pub use resources::*;

use crate::cmd::KubeCli;
use crate::config::{SuiteConfig, MEDIUM_POLL_INTERVAL};
use crate::context::aggregate_failures;
use crate::error::{is_already_exists, is_not_found, Error, Result};
use crate::k8s;
use crate::suite::logs;
use crate::wait::Poller;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::DynamicObject;
use kube::Client;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const SUBSCRIPTION_NAME: &str = "apicurio-registry-sub";
pub const OPERATOR_GROUP_NAME: &str = "apicurio-registry-operator-group";
pub const CATALOG_SOURCE_NAME: &str = "apicurio-registry-catalog";

/// Global operators namespace on vanilla OLM
pub const CLUSTER_WIDE_NAMESPACE: &str = "operators";
/// Global operators namespace on OpenShift
pub const OPENSHIFT_CLUSTER_WIDE_NAMESPACE: &str = "openshift-operators";

const CATALOG_EXISTS_TIMEOUT: Duration = Duration::from_secs(200);
const CATALOG_POD_TIMEOUT: Duration = Duration::from_secs(90);
const CATALOG_POD_READY_TIMEOUT: Duration = Duration::from_secs(120);
const CATALOG_READY_TIMEOUT: Duration = Duration::from_secs(300);
const PACKAGE_MANIFEST_TIMEOUT: Duration = Duration::from_secs(540);
const SUBSCRIPTION_CSV_TIMEOUT: Duration = Duration::from_secs(120);
const CSV_SUCCEEDED_TIMEOUT: Duration = Duration::from_secs(160);

/// Progress of an OLM install
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstallState {
    NoCatalog,
    CatalogCreated,
    CatalogReady,
    OperatorGroupCreated,
    PackageManifestResolved,
    SubscriptionCreated,
    OperatorDeploymentReady,
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstallState::NoCatalog => "no-catalog",
            InstallState::CatalogCreated => "catalog-created",
            InstallState::CatalogReady => "catalog-ready",
            InstallState::OperatorGroupCreated => "operator-group-created",
            InstallState::PackageManifestResolved => "package-manifest-resolved",
            InstallState::SubscriptionCreated => "subscription-created",
            InstallState::OperatorDeploymentReady => "operator-deployment-ready",
        };
        f.write_str(s)
    }
}

/// Namespaced object reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub name: String,
    pub namespace: String,
}

impl ObjectRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// What an OLM install created, consumed by `uninstall_operator`
#[derive(Debug, Clone)]
pub struct OlmInstallation {
    pub operator_namespace: String,
    pub cluster_wide: bool,
    /// `None` when a pre-existing catalog source was reused
    pub catalog_source: Option<ObjectRef>,
    /// `None` for cluster-wide installs
    pub operator_group: Option<ObjectRef>,
    pub subscription: Option<ObjectRef>,
    pub csv: Option<String>,
    pub state: InstallState,
}

impl OlmInstallation {
    /// Empty record, filled in by `install_operator` as objects are created
    pub fn new(operator_namespace: &str, cluster_wide: bool) -> Self {
        Self {
            operator_namespace: operator_namespace.to_string(),
            cluster_wide,
            catalog_source: None,
            operator_group: None,
            subscription: None,
            csv: None,
            state: InstallState::NoCatalog,
        }
    }

    fn advance(&mut self, next: InstallState) {
        info!(from = %self.state, to = %next, namespace = %self.operator_namespace, "OLM install state");
        self.state = next;
    }
}

fn api(client: &Client, namespace: &str, ar: &kube::discovery::ApiResource) -> Api<DynamicObject> {
    Api::namespaced_with(client.clone(), namespace, ar)
}

/// Namespace the operator lands in for the given install mode
pub fn operator_namespace(cluster_wide: bool, is_openshift: bool) -> &'static str {
    match (cluster_wide, is_openshift) {
        (false, _) => crate::config::OPERATOR_NAMESPACE,
        (true, false) => CLUSTER_WIDE_NAMESPACE,
        (true, true) => OPENSHIFT_CLUSTER_WIDE_NAMESPACE,
    }
}

/// Create a CatalogSource and wait for its gRPC connection to be READY
///
/// "Already exists" is tolerated so a re-run can reuse the catalog.
pub async fn create_catalog_source(
    client: &Client,
    cli: &KubeCli,
    is_openshift: bool,
    namespace: &str,
    name: &str,
    image: &str,
) -> Result<()> {
    let catalogs = api(client, namespace, &catalog_source_resource());

    info!(catalog = %name, namespace = %namespace, image = %image, "Creating catalog source");
    match catalogs
        .create(&PostParams::default(), &catalog_source(name, namespace, image))
        .await
    {
        Ok(_) => {}
        Err(e) if is_already_exists(&e) => {
            warn!(catalog = %name, "Catalog source already exists, reusing it")
        }
        Err(e) => return Err(e.into()),
    }

    let exists = Poller::new(CATALOG_EXISTS_TIMEOUT)
        .until_present(&format!("catalogsource {}/{}", namespace, name), &catalogs, name)
        .await;
    if exists.is_err() {
        cli.dump_yaml(namespace, "catalogsource").await;
    }
    exists?;

    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let selector = format!("olm.catalogSource={}", name);

    // Pod appearance is best effort; readiness of the catalog itself is
    // what gates the install.
    let pod_listed = Poller::new(CATALOG_POD_TIMEOUT)
        .until(&format!("catalog pod [{}]", selector), || {
            let pods = pods.clone();
            let selector = selector.clone();
            async move {
                let list = pods.list(&ListParams::default().labels(&selector)).await?;
                Ok(!list.items.is_empty())
            }
        })
        .await;
    if let Err(e) = pod_listed {
        warn!(error = %e, "Catalog source pod did not show up");
    }

    if is_openshift {
        // The first catalog pod on OpenShift frequently caches a stale index
        pods.delete_collection(
            &DeleteParams::default(),
            &ListParams::default().labels(&selector),
        )
        .await?;
    }

    let pods_ready = Poller::new(CATALOG_POD_READY_TIMEOUT)
        .until(&format!("catalog pods ready [{}]", selector), || {
            let pods = pods.clone();
            let selector = selector.clone();
            async move {
                let list = pods.list(&ListParams::default().labels(&selector)).await?;
                Ok(!list.items.is_empty() && list.items.iter().all(first_container_ready))
            }
        })
        .await;
    if let Err(e) = pods_ready {
        warn!(error = %e, "Catalog source pods not ready, still waiting on catalog state");
    }

    let ready = Poller::new(CATALOG_READY_TIMEOUT)
        .until(&format!("catalogsource {}/{} READY", namespace, name), || {
            let catalogs = catalogs.clone();
            async move {
                Ok(catalogs
                    .get_opt(name)
                    .await?
                    .is_some_and(|c| catalog_connection_state(&c) == Some("READY")))
            }
        })
        .await;
    cli.get_pods(namespace).await.ok();
    if ready.is_err() {
        cli.dump_yaml(namespace, "catalogsource").await;
    }
    ready
}

fn first_container_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|cs| cs.first())
        .is_some_and(|c| c.ready)
}

pub async fn delete_catalog_source(client: &Client, namespace: &str, name: &str) -> Result<()> {
    info!(catalog = %name, namespace = %namespace, "Removing catalog source");
    delete_ignoring_not_found(&api(client, namespace, &catalog_source_resource()), name).await
}

/// True if any OperatorGroup exists in the namespace
pub async fn any_operator_group_exists(client: &Client, namespace: &str) -> Result<bool> {
    let groups = api(client, namespace, &operator_group_resource());
    match groups.list(&ListParams::default()).await {
        Ok(list) => Ok(!list.items.is_empty()),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub async fn create_operator_group(client: &Client, namespace: &str, name: &str) -> Result<()> {
    info!(operator_group = %name, namespace = %namespace, "Creating operator group");
    api(client, namespace, &operator_group_resource())
        .create(&PostParams::default(), &operator_group(name, namespace))
        .await?;
    Ok(())
}

pub async fn delete_operator_group(client: &Client, namespace: &str, name: &str) -> Result<()> {
    delete_ignoring_not_found(&api(client, namespace, &operator_group_resource()), name).await
}

pub async fn create_subscription(client: &Client, req: &SubscriptionRequest) -> Result<()> {
    info!(
        package = %req.package,
        channel = %req.channel,
        csv = %req.starting_csv,
        namespace = %req.namespace,
        "Creating operator subscription"
    );
    api(client, &req.namespace, &subscription_resource())
        .create(&PostParams::default(), &subscription(req))
        .await?;
    Ok(())
}

/// Delete a Subscription and the CSV it installed
///
/// OLM leaves the CSV behind when a subscription goes away, so it is deleted
/// explicitly. A missing CSV means the operator is already gone and the
/// removal wait is skipped.
pub async fn delete_subscription(
    client: &Client,
    sub: &ObjectRef,
    csv: Option<&str>,
    wait_for_operator: bool,
) -> Result<()> {
    info!(subscription = %sub.name, namespace = %sub.namespace, "Deleting subscription");
    delete_ignoring_not_found(&api(client, &sub.namespace, &subscription_resource()), &sub.name)
        .await?;

    match csv.filter(|c| !c.is_empty()) {
        Some(csv) => delete_csv(client, &sub.namespace, csv, wait_for_operator).await,
        None => Ok(()),
    }
}

/// Delete a ClusterServiceVersion, optionally waiting for its operator to go
pub async fn delete_csv(client: &Client, namespace: &str, csv: &str, wait_for_operator: bool) -> Result<()> {
    info!(csv = %csv, namespace = %namespace, "Deleting cluster service version");
    let csvs = api(client, namespace, &csv_resource());
    match csvs.delete(csv, &DeleteParams::default()).await {
        Ok(_) => {}
        Err(e) if is_not_found(&e) => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    if wait_for_operator {
        k8s::wait_for_operator_removed(client, namespace).await?;
    }
    Ok(())
}

/// Wait until a package manifest served by `catalog` is visible
pub async fn wait_for_package_manifest(
    client: &Client,
    namespace: &str,
    catalog: &str,
    package: &str,
) -> Result<DynamicObject> {
    let manifests = api(client, namespace, &package_manifest_resource());
    let selector = format!("catalog={}", catalog);
    let what = format!("packagemanifest {}/{} [{}]", namespace, package, selector);

    Poller::new(PACKAGE_MANIFEST_TIMEOUT)
        .until(&what, || {
            let manifests = manifests.clone();
            let selector = selector.clone();
            async move {
                let list = manifests
                    .list(&ListParams::default().labels(&selector))
                    .await?;
                Ok(list
                    .items
                    .iter()
                    .any(|m| m.metadata.name.as_deref() == Some(package)))
            }
        })
        .await?;

    Ok(manifests.get(package).await?)
}

/// Install the operator through OLM
///
/// `install` is filled in as objects are created, so after a failure it
/// still describes what `uninstall_operator` has to remove. A cluster-wide
/// record subscribes in the global operators namespace and skips the
/// OperatorGroup / namespace lifecycle.
pub async fn install_operator(
    client: &Client,
    cli: &KubeCli,
    config: &SuiteConfig,
    is_openshift: bool,
    install: &mut OlmInstallation,
) -> Result<()> {
    let cluster_wide = install.cluster_wide;
    let namespace = install.operator_namespace.clone();
    let operator_ns = namespace.as_str();
    let olm = &config.olm;

    if !cluster_wide {
        k8s::create_namespace(client, operator_ns, config.pull_secret.as_ref()).await?;
    }
    let catalog_ns = olm.catalog_source_namespace.as_str();
    k8s::create_namespace(client, catalog_ns, None).await?;

    let catalog_name = match &olm.default_catalog_source {
        Some(existing) => {
            info!(catalog = %existing, "Using pre-existing catalog source");
            install.advance(InstallState::CatalogReady);
            existing.clone()
        }
        None => {
            let image = olm.catalog_source_image.as_deref().ok_or_else(|| {
                Error::Config(format!(
                    "{} is required for OLM installs",
                    crate::config::env::OLM_CATALOG_SOURCE_IMAGE
                ))
            })?;
            install.catalog_source = Some(ObjectRef::new(CATALOG_SOURCE_NAME, catalog_ns));
            install.advance(InstallState::CatalogCreated);
            create_catalog_source(client, cli, is_openshift, catalog_ns, CATALOG_SOURCE_NAME, image)
                .await?;
            install.advance(InstallState::CatalogReady);
            CATALOG_SOURCE_NAME.to_string()
        }
    };

    if !cluster_wide {
        create_operator_group(client, operator_ns, OPERATOR_GROUP_NAME).await?;
        install.operator_group = Some(ObjectRef::new(OPERATOR_GROUP_NAME, operator_ns));
        install.advance(InstallState::OperatorGroupCreated);
    }

    let manifest = if olm.channel.is_some() && olm.csv.is_some() {
        None
    } else {
        let found =
            wait_for_package_manifest(client, catalog_ns, &catalog_name, &olm.package_manifest_name)
                .await;
        if found.is_err() {
            cli.dump_diagnostics(operator_ns).await;
            cli.execute(&["get", "packagemanifest", "-n", catalog_ns])
                .await
                .ok();
        }
        Some(found?)
    };
    let (channel, csv) = resolve_channel(manifest.as_ref(), olm.channel.as_deref(), olm.csv.as_deref())?;
    info!(channel = %channel, csv = %csv, "Resolved OLM channel");
    install.advance(InstallState::PackageManifestResolved);

    let request = SubscriptionRequest {
        name: SUBSCRIPTION_NAME.to_string(),
        namespace: operator_ns.to_string(),
        package: olm.package_manifest_name.clone(),
        catalog_source: catalog_name,
        catalog_source_namespace: catalog_ns.to_string(),
        channel,
        starting_csv: csv.clone(),
    };
    create_subscription(client, &request).await?;
    install.subscription = Some(ObjectRef::new(SUBSCRIPTION_NAME, operator_ns));
    install.csv = Some(csv);
    install.advance(InstallState::SubscriptionCreated);

    k8s::wait_for_operator_ready(client, cli, operator_ns).await?;
    install.advance(InstallState::OperatorDeploymentReady);
    Ok(())
}

/// One object removed by `uninstall_operator`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UninstallStep {
    Subscription(ObjectRef),
    /// Waits for the operator deployment to go away
    Csv(ObjectRef),
    OperatorGroup(ObjectRef),
    CatalogSource(ObjectRef),
    Namespace(String),
}

impl fmt::Display for UninstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UninstallStep::Subscription(r) => write!(f, "delete subscription {}/{}", r.namespace, r.name),
            UninstallStep::Csv(r) => write!(f, "delete csv {}/{}", r.namespace, r.name),
            UninstallStep::OperatorGroup(r) => write!(f, "delete operator group {}/{}", r.namespace, r.name),
            UninstallStep::CatalogSource(r) => write!(f, "delete catalog source {}/{}", r.namespace, r.name),
            UninstallStep::Namespace(ns) => write!(f, "delete namespace {}", ns),
        }
    }
}

/// What to delete for a (possibly partial) install, in order
///
/// Subscription, CSV, OperatorGroup, CatalogSource, then the operator
/// namespace. Objects the record never got to are left out, and
/// cluster-wide installs keep the shared namespace.
pub fn uninstall_plan(install: &OlmInstallation) -> Vec<UninstallStep> {
    let mut steps = Vec::new();
    if let Some(sub) = &install.subscription {
        steps.push(UninstallStep::Subscription(sub.clone()));
        if let Some(csv) = install.csv.as_deref().filter(|c| !c.is_empty()) {
            steps.push(UninstallStep::Csv(ObjectRef::new(csv, sub.namespace.as_str())));
        }
    }
    if let Some(group) = &install.operator_group {
        steps.push(UninstallStep::OperatorGroup(group.clone()));
    }
    if let Some(catalog) = &install.catalog_source {
        steps.push(UninstallStep::CatalogSource(catalog.clone()));
    }
    if !install.cluster_wide {
        steps.push(UninstallStep::Namespace(install.operator_namespace.clone()));
    }
    steps
}

async fn run_uninstall_step(client: &Client, step: &UninstallStep) -> Result<()> {
    match step {
        UninstallStep::Subscription(sub) => delete_subscription(client, sub, None, false).await,
        UninstallStep::Csv(csv) => delete_csv(client, &csv.namespace, &csv.name, true).await,
        UninstallStep::OperatorGroup(group) => delete_operator_group(client, &group.namespace, &group.name).await,
        UninstallStep::CatalogSource(catalog) => {
            delete_catalog_source(client, &catalog.namespace, &catalog.name).await
        }
        UninstallStep::Namespace(ns) => k8s::delete_namespace(client, ns).await,
    }
}

/// Reverse an OLM install
///
/// Operator logs are saved first so they survive the namespace deletion.
/// Every step of `uninstall_plan` runs, whatever the previous ones returned.
pub async fn uninstall_operator(client: &Client, logs_dir: &Path, install: &OlmInstallation) -> Result<()> {
    if let Err(e) = logs::save_operator_logs(client, logs_dir, &install.operator_namespace).await {
        warn!(error = %e, "Failed to save operator logs");
    }

    info!(namespace = %install.operator_namespace, state = %install.state, "Uninstalling operator");
    let mut results = Vec::new();
    for step in uninstall_plan(install) {
        let result = run_uninstall_step(client, &step).await;
        results.push((step.to_string(), result));
    }
    aggregate_failures(results)
}

/// Point an existing Subscription at another catalog / channel
pub async fn update_subscription(
    client: &Client,
    sub: &ObjectRef,
    channel: &str,
    catalog_source: &str,
    catalog_source_namespace: &str,
) -> Result<()> {
    info!(
        subscription = %sub.name,
        channel = %channel,
        catalog = %catalog_source,
        "Updating subscription"
    );
    let patch = serde_json::json!({
        "spec": {
            "channel": channel,
            "source": catalog_source,
            "sourceNamespace": catalog_source_namespace,
        }
    });
    api(client, &sub.namespace, &subscription_resource())
        .patch(&sub.name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Wait for a Subscription to report `expected` as its current CSV
pub async fn wait_for_subscription_csv(client: &Client, sub: &ObjectRef, expected: &str) -> Result<()> {
    let subs = api(client, &sub.namespace, &subscription_resource());
    let what = format!("subscription {} currentCSV {}", sub.name, expected);
    Poller::new(SUBSCRIPTION_CSV_TIMEOUT)
        .until(&what, || {
            let subs = subs.clone();
            async move {
                Ok(subs
                    .get_opt(&sub.name)
                    .await?
                    .is_some_and(|s| subscription_current_csv(&s) == Some(expected)))
            }
        })
        .await
}

/// Wait for a CSV to reach phase `Succeeded`; phase `Failed` aborts
pub async fn wait_for_csv_succeeded(client: &Client, namespace: &str, csv: &str) -> Result<()> {
    let csvs = api(client, namespace, &csv_resource());
    let what = format!("csv {}/{} Succeeded", namespace, csv);
    Poller::new(CSV_SUCCEEDED_TIMEOUT)
        .with_interval(MEDIUM_POLL_INTERVAL)
        .until(&what, || {
            let csvs = csvs.clone();
            async move {
                let Some(found) = csvs.get_opt(csv).await? else {
                    return Ok(false);
                };
                match csv_phase(&found) {
                    Some("Succeeded") => Ok(true),
                    Some("Failed") => Err(Error::scenario(format!("CSV {} failed to install", csv))),
                    _ => Ok(false),
                }
            }
        })
        .await
}

/// Wait until a CSV object is gone
pub async fn wait_for_csv_removed(client: &Client, namespace: &str, csv: &str) -> Result<()> {
    let csvs = api(client, namespace, &csv_resource());
    Poller::new(k8s::OPERATOR_REMOVED_TIMEOUT)
        .until_absent(&format!("csv {}/{} removal", namespace, csv), &csvs, csv)
        .await
}

async fn delete_ignoring_not_found(api: &Api<DynamicObject>, name: &str) -> Result<()> {
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "olm_test.rs"]
mod tests;
