//! Installing the operator under test
//!
//! Two flavours: apply the raw manifest bundle into the operator
//! namespace, or subscribe through OLM (namespaced or cluster-wide).
//! Either way install returns a record that uninstall consumes.

use crate::cmd::render_template;
use crate::context::aggregate_failures;
use crate::config::{InstallerKind, OPERATOR_DEPLOYMENT_NAME, OPERATOR_NAMESPACE, PULL_SECRET_NAME};
use crate::error::{Error, Result};
use crate::k8s;
use crate::olm::{self, OlmInstallation};
use crate::suite::logs;
use crate::suite::SuiteContext;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Directory bundle files, in apply order
pub const BUNDLE_FILES: [&str; 7] = [
    "service_account.yaml",
    "role.yaml",
    "role_binding.yaml",
    "cluster_role.yaml",
    "cluster_role_binding.yaml",
    "crds/apicur.io_apicurioregistries_crd.yaml",
    "operator.yaml",
];

const SERVICE_ACCOUNT_FILE: &str = "service_account.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorInstaller {
    Bundle,
    Olm { cluster_wide: bool },
}

impl From<InstallerKind> for OperatorInstaller {
    fn from(kind: InstallerKind) -> Self {
        match kind {
            InstallerKind::Bundle => OperatorInstaller::Bundle,
            InstallerKind::Olm => OperatorInstaller::Olm { cluster_wide: false },
            InstallerKind::OlmClusterwide => OperatorInstaller::Olm { cluster_wide: true },
        }
    }
}

/// Where the manifest bundle comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleSource {
    /// Applied straight from the URL
    Url(String),
    /// One multi-document file with `{NAMESPACE}` placeholders
    File(PathBuf),
    /// A directory holding `BUNDLE_FILES`
    Directory(PathBuf),
}

impl BundleSource {
    pub fn parse(path: &str) -> Self {
        if path.starts_with("https://") {
            BundleSource::Url(path.to_string())
        } else if path.ends_with(".yaml") {
            BundleSource::File(PathBuf::from(path))
        } else {
            BundleSource::Directory(PathBuf::from(path))
        }
    }
}

/// Bundle files under `dir`, in apply order
pub fn bundle_files(dir: &Path) -> Vec<PathBuf> {
    BUNDLE_FILES.iter().map(|f| dir.join(f)).collect()
}

/// Read a manifest and fill in the target namespace
pub async fn render_bundle_file(path: &Path, namespace: &str) -> Result<String> {
    let template = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::Config(format!("cannot read bundle file {}: {}", path.display(), e))
    })?;
    Ok(render_template(&template, &[("NAMESPACE", namespace)]))
}

/// What an install created
#[derive(Debug, Clone)]
pub enum OperatorInstallation {
    Bundle { namespace: String, source: BundleSource },
    Olm(OlmInstallation),
}

impl OperatorInstallation {
    pub fn namespace(&self) -> &str {
        match self {
            OperatorInstallation::Bundle { namespace, .. } => namespace,
            OperatorInstallation::Olm(install) => &install.operator_namespace,
        }
    }

    pub fn olm(&self) -> Option<&OlmInstallation> {
        match self {
            OperatorInstallation::Olm(install) => Some(install),
            OperatorInstallation::Bundle { .. } => None,
        }
    }
}

impl OperatorInstaller {
    /// Record of what `install` will create, before anything is created
    ///
    /// Bundle installs fail here when no bundle path is configured.
    pub fn planned_installation(&self, suite: &SuiteContext) -> Result<OperatorInstallation> {
        match *self {
            OperatorInstaller::Bundle => {
                let path = suite.config.operator_bundle_path.as_deref().ok_or_else(|| {
                    Error::Config(format!(
                        "{} is required for bundle installs",
                        crate::config::env::OPERATOR_BUNDLE_PATH
                    ))
                })?;
                Ok(OperatorInstallation::Bundle {
                    namespace: OPERATOR_NAMESPACE.to_string(),
                    source: BundleSource::parse(path),
                })
            }
            OperatorInstaller::Olm { cluster_wide } => Ok(OperatorInstallation::Olm(OlmInstallation::new(
                olm::operator_namespace(cluster_wide, suite.is_openshift),
                cluster_wide,
            ))),
        }
    }

    /// Install the operator and wait for it
    ///
    /// On failure whatever was created so far is uninstalled before the
    /// install error is returned.
    pub async fn install(&self, suite: &SuiteContext) -> Result<OperatorInstallation> {
        let mut installation = self.planned_installation(suite)?;
        let result = match &mut installation {
            OperatorInstallation::Bundle { namespace, source } => apply_bundle(suite, namespace, source).await,
            OperatorInstallation::Olm(install) => {
                olm::install_operator(&suite.client, &suite.cli, &suite.config, suite.is_openshift, install).await
            }
        };

        if let Err(e) = result {
            warn!(error = %e, namespace = %installation.namespace(), "Operator install failed, removing it");
            if let Err(undo) = self.uninstall(suite, &installation).await {
                error!(error = %undo, "Failed to remove partially installed operator");
            }
            return Err(e);
        }
        Ok(installation)
    }

    pub async fn uninstall(&self, suite: &SuiteContext, installation: &OperatorInstallation) -> Result<()> {
        match installation {
            OperatorInstallation::Bundle { namespace, source } => {
                uninstall_bundle(suite, namespace, source).await
            }
            OperatorInstallation::Olm(install) => {
                olm::uninstall_operator(&suite.client, &suite.logs_dir(), install).await
            }
        }
    }
}

async fn apply_bundle(suite: &SuiteContext, namespace: &str, source: &BundleSource) -> Result<()> {
    k8s::create_namespace(&suite.client, namespace, suite.config.pull_secret.as_ref()).await?;
    info!(bundle = ?source, namespace = %namespace, "Installing operator bundle");

    match source {
        BundleSource::Url(url) => suite.cli.apply_path(namespace, url).await?,
        BundleSource::File(file) => {
            let yaml = render_bundle_file(file, namespace).await?;
            suite.cli.apply_yaml(namespace, &yaml).await?;
        }
        BundleSource::Directory(dir) => {
            for file in bundle_files(dir) {
                let yaml = render_bundle_file(&file, namespace).await?;
                suite.cli.apply_yaml(namespace, &yaml).await?;
                if file.ends_with(SERVICE_ACCOUNT_FILE) && suite.config.pull_secret.is_some() {
                    k8s::set_pull_secret(&suite.client, namespace, OPERATOR_DEPLOYMENT_NAME, PULL_SECRET_NAME)
                        .await?;
                }
            }
        }
    }

    k8s::wait_for_operator_ready(&suite.client, &suite.cli, namespace).await
}

/// Delete the bundle objects, then the namespace
///
/// Each step runs even if an earlier one failed; objects that were never
/// applied are ignored by `--ignore-not-found`.
async fn uninstall_bundle(suite: &SuiteContext, namespace: &str, source: &BundleSource) -> Result<()> {
    if let Err(e) = logs::save_operator_logs(&suite.client, &suite.logs_dir(), namespace).await {
        warn!(error = %e, "Failed to save operator logs");
    }
    info!(namespace = %namespace, "Uninstalling operator bundle");

    let mut steps = Vec::new();
    match source {
        BundleSource::Url(url) => {
            steps.push((format!("delete {}", url), suite.cli.delete_path(namespace, url).await));
        }
        BundleSource::File(file) => {
            steps.push((format!("delete {}", file.display()), delete_bundle_file(suite, file, namespace).await));
        }
        BundleSource::Directory(dir) => {
            for file in bundle_files(dir).iter().rev() {
                steps.push((format!("delete {}", file.display()), delete_bundle_file(suite, file, namespace).await));
            }
        }
    }

    let removed = k8s::wait_for_operator_removed(&suite.client, namespace).await;
    steps.push(("operator removal".to_string(), removed));
    steps.push((
        format!("delete namespace {}", namespace),
        k8s::delete_namespace(&suite.client, namespace).await,
    ));
    aggregate_failures(steps)
}

async fn delete_bundle_file(suite: &SuiteContext, file: &Path, namespace: &str) -> Result<()> {
    let yaml = render_bundle_file(file, namespace).await?;
    suite.cli.delete_yaml(namespace, &yaml).await
}

#[cfg(test)]
#[path = "operator_test.rs"]
mod tests;
