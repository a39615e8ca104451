//! Suite configuration
//!
//! Everything tunable about a run is read once at startup:
//! - `SuiteConfig::from_env` reads the `E2E_*` environment variables
//! - `Flags` holds the command-line toggles
//!
//! Both are immutable afterwards and travel inside `SuiteContext`.

use crate::error::{Error, Result};
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Namespace the operator is installed into for namespaced installs
pub const OPERATOR_NAMESPACE: &str = "apicurio-registry-e2e";

/// Name of the operator Deployment created by every install flavour
pub const OPERATOR_DEPLOYMENT_NAME: &str = "apicurio-registry-operator";

/// Name of the image pull secret created in test namespaces
pub const PULL_SECRET_NAME: &str = "apicurio-registry-pull-secret";

/// Poll interval for plain API reads
pub const API_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Poll interval for slower transitions (CSV phases, broker pods)
pub const MEDIUM_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll interval for multi-minute waits
pub const LONG_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub const DEFAULT_CATALOG_SOURCE_NAMESPACE: &str = "olm";
pub const DEFAULT_PACKAGE_MANIFEST_NAME: &str = "apicurio-registry";
pub const DEFAULT_TESTS_PROFILE: &str = "smoke";

/// Environment variable names
pub mod env {
    pub const SUITE_PROJECT_DIR: &str = "E2E_SUITE_PROJECT_DIR";
    pub const APICURIO_PROJECT_DIR: &str = "E2E_APICURIO_PROJECT_DIR";
    pub const APICURIO_TESTS_PROFILE: &str = "E2E_APICURIO_TESTS_PROFILE";
    pub const EXTRA_MAVEN_ARGS: &str = "E2E_EXTRA_MAVEN_ARGS";
    pub const OPERATOR_BUNDLE_PATH: &str = "E2E_OPERATOR_BUNDLE_PATH";
    pub const STRIMZI_BUNDLE_PATH: &str = "E2E_STRIMZI_BUNDLE_PATH";
    pub const OLM_CATALOG_SOURCE_IMAGE: &str = "E2E_OLM_CATALOG_SOURCE_IMAGE";
    pub const OLM_CATALOG_SOURCE_NAMESPACE: &str = "E2E_OLM_CATALOG_SOURCE_NAMESPACE";
    pub const OLM_PACKAGE_MANIFEST_NAME: &str = "E2E_OLM_PACKAGE_MANIFEST_NAME";
    pub const OLM_USE_DEFAULT_CATALOG_SOURCE: &str = "E2E_OLM_USE_DEFAULT_CATALOG_SOURCE";
    pub const OLM_CHANNEL: &str = "E2E_OLM_CHANNEL";
    pub const OLM_CSV: &str = "E2E_OLM_CSV";
    pub const OLM_UPGRADE_CHANNEL: &str = "E2E_OLM_UPGRADE_CHANNEL";
    pub const OLM_UPGRADE_OLD_CATALOG: &str = "E2E_OLM_UPGRADE_OLD_CATALOG";
    pub const OLM_UPGRADE_OLD_CATALOG_NAMESPACE: &str = "E2E_OLM_UPGRADE_OLD_CATALOG_NAMESPACE";
    pub const OLM_UPGRADE_OLD_CSV: &str = "E2E_OLM_UPGRADE_OLD_CSV";
    pub const OLM_UPGRADE_NEW_CSV: &str = "E2E_OLM_UPGRADE_NEW_CSV";
    pub const PULL_SECRET_SERVER: &str = "E2E_PULL_SECRET_SERVER";
    pub const PULL_SECRET_USER: &str = "E2E_PULL_SECRET_USER";
    pub const PULL_SECRET_PASSWORD: &str = "E2E_PULL_SECRET_PASSWORD";
    pub const CONVERTERS_URL: &str = "E2E_CONVERTERS_URL";
    pub const CONVERTERS_SHA512SUM: &str = "E2E_CONVERTERS_SHA512SUM";
    pub const SUMMARY_FILE: &str = "E2E_SUMMARY_FILE";
}

/// How the operator under test gets onto the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InstallerKind {
    /// Apply the raw manifest bundle
    Bundle,
    /// OLM subscription into the operator namespace
    Olm,
    /// OLM subscription into the global operators namespace
    OlmClusterwide,
}

/// Command-line toggles
#[derive(Args, Debug, Clone)]
pub struct Flags {
    /// Only run the scenarios that exercise the operator itself
    #[arg(long)]
    pub only_test_operator: bool,

    /// Deploy a shared Selenium instance for UI tests
    #[arg(long)]
    pub setup_selenium: bool,

    /// Skip multi-replica scenarios
    #[arg(long)]
    pub disable_clustered_tests: bool,

    /// Skip the Kafka Connect converters scenario
    #[arg(long)]
    pub disable_converters_tests: bool,

    /// Skip the Keycloak security scenarios
    #[arg(long)]
    pub disable_auth_tests: bool,

    /// Enable OLM upgrade scenarios
    #[arg(long)]
    pub enable_olm_advanced_tests: bool,

    /// Install the Kafka operator through OLM instead of its bundle
    #[arg(long)]
    pub install_strimzi_olm: bool,

    /// Operator install flavour
    #[arg(long, value_enum, default_value = "bundle")]
    pub installer: InstallerKind,

    /// Identifier for this run, used for the log directory
    #[arg(long)]
    pub suite_id: Option<String>,

    /// Only run scenarios whose name contains this text
    #[arg(long)]
    pub focus: Option<String>,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            only_test_operator: false,
            setup_selenium: false,
            disable_clustered_tests: false,
            disable_converters_tests: false,
            disable_auth_tests: false,
            enable_olm_advanced_tests: false,
            install_strimzi_olm: false,
            installer: InstallerKind::Bundle,
            suite_id: None,
            focus: None,
        }
    }
}

/// Credentials for a private image registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSecretCredentials {
    pub server: String,
    pub user: String,
    pub password: String,
}

/// Channel/CSV pair plus the catalog the old version is served from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeConfig {
    pub channel: Option<String>,
    pub old_catalog: Option<String>,
    pub old_catalog_namespace: Option<String>,
    pub old_csv: Option<String>,
    pub new_csv: Option<String>,
}

impl UpgradeConfig {
    pub fn is_complete(&self) -> bool {
        self.channel.is_some()
            && self.old_catalog.is_some()
            && self.old_catalog_namespace.is_some()
            && self.old_csv.is_some()
            && self.new_csv.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OlmConfig {
    pub catalog_source_image: Option<String>,
    pub catalog_source_namespace: String,
    pub package_manifest_name: String,
    /// Use an already present catalog source instead of creating one
    pub default_catalog_source: Option<String>,
    pub channel: Option<String>,
    pub csv: Option<String>,
    pub upgrade: UpgradeConfig,
}

/// Immutable suite configuration read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteConfig {
    pub suite_project_dir: PathBuf,
    pub apicurio_project_dir: PathBuf,
    pub tests_profile: Option<String>,
    pub extra_maven_args: Vec<String>,
    pub operator_bundle_path: Option<String>,
    pub strimzi_bundle_path: Option<String>,
    pub olm: OlmConfig,
    pub pull_secret: Option<PullSecretCredentials>,
    pub converters_url: Option<String>,
    pub converters_sha512sum: Option<String>,
    pub summary_file: Option<PathBuf>,
}

impl SuiteConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let suite_project_dir = match get(env::SUITE_PROJECT_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()?,
        };
        let apicurio_project_dir = get(env::APICURIO_PROJECT_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| suite_project_dir.join("apicurio-registry"));

        let pull_secret = match (
            get(env::PULL_SECRET_SERVER),
            get(env::PULL_SECRET_USER),
            get(env::PULL_SECRET_PASSWORD),
        ) {
            (Some(server), Some(user), Some(password)) => Some(PullSecretCredentials {
                server,
                user,
                password,
            }),
            (None, None, None) => None,
            _ => {
                return Err(Error::Config(format!(
                    "{}, {} and {} must be set together",
                    env::PULL_SECRET_SERVER,
                    env::PULL_SECRET_USER,
                    env::PULL_SECRET_PASSWORD
                )))
            }
        };

        let olm = OlmConfig {
            catalog_source_image: get(env::OLM_CATALOG_SOURCE_IMAGE),
            catalog_source_namespace: get(env::OLM_CATALOG_SOURCE_NAMESPACE)
                .unwrap_or_else(|| DEFAULT_CATALOG_SOURCE_NAMESPACE.to_string()),
            package_manifest_name: get(env::OLM_PACKAGE_MANIFEST_NAME)
                .unwrap_or_else(|| DEFAULT_PACKAGE_MANIFEST_NAME.to_string()),
            default_catalog_source: get(env::OLM_USE_DEFAULT_CATALOG_SOURCE),
            channel: get(env::OLM_CHANNEL),
            csv: get(env::OLM_CSV),
            upgrade: UpgradeConfig {
                channel: get(env::OLM_UPGRADE_CHANNEL),
                old_catalog: get(env::OLM_UPGRADE_OLD_CATALOG),
                old_catalog_namespace: get(env::OLM_UPGRADE_OLD_CATALOG_NAMESPACE),
                old_csv: get(env::OLM_UPGRADE_OLD_CSV),
                new_csv: get(env::OLM_UPGRADE_NEW_CSV),
            },
        };

        Ok(Self {
            suite_project_dir,
            apicurio_project_dir,
            tests_profile: get(env::APICURIO_TESTS_PROFILE),
            extra_maven_args: get(env::EXTRA_MAVEN_ARGS)
                .map(|args| args.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            operator_bundle_path: get(env::OPERATOR_BUNDLE_PATH),
            strimzi_bundle_path: get(env::STRIMZI_BUNDLE_PATH),
            olm,
            pull_secret,
            converters_url: get(env::CONVERTERS_URL),
            converters_sha512sum: get(env::CONVERTERS_SHA512SUM),
            summary_file: get(env::SUMMARY_FILE).map(PathBuf::from),
        })
    }

    /// Profile handed to the functional test run when a scenario sets none
    pub fn effective_tests_profile(&self) -> &str {
        self.tests_profile.as_deref().unwrap_or(DEFAULT_TESTS_PROFILE)
    }

    /// Root of the per-run log tree
    pub fn logs_dir(&self, suite_id: &str) -> PathBuf {
        self.suite_project_dir.join("tests-logs").join(suite_id)
    }

    /// The shared broker is only needed by profiles that run serdes tests
    pub fn needs_shared_kafka(&self) -> bool {
        matches!(
            self.tests_profile.as_deref(),
            Some("all") | Some("acceptance") | Some("serdes")
        )
    }

    /// UI profiles need a browser reachable from the test run
    pub fn needs_selenium(&self, flags: &Flags) -> bool {
        flags.setup_selenium
            || matches!(
                self.tests_profile.as_deref(),
                Some("ui") | Some("all") | Some("acceptance")
            )
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
