//! Suite lifecycle
//!
//! Bootstrap connects to the cluster, then brings up the shared pieces
//! every scenario may rely on: Selenium, a shared broker and the operator
//! under test. Each step registers its undo on a suite-level
//! `CleanupStack`, so teardown (or a bootstrap failure half way) removes
//! exactly what was created, newest first.

pub mod logs;
pub mod report;
pub mod runner;
pub mod selenium;

use crate::cmd::{CliBinary, KubeCli};
use crate::config::{Flags, InstallerKind, SuiteConfig};
use crate::context::CleanupStack;
use crate::error::Result;
use crate::k8s;
use crate::kafka::{self, KafkaClusterInfo, KafkaClusterRequest};
use crate::operator::OperatorInstaller;
use crate::scenarios;
use futures::FutureExt;
use kube::Client;
use runner::SuiteReport;
use selenium::SeleniumInfo;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// The shared broker lives apart from the operator namespace, which the
/// bundle uninstall deletes
pub const SHARED_KAFKA_NAMESPACE: &str = "e2e-shared-kafka";

/// Everything a scenario needs from the suite, cheap to clone
#[derive(Clone)]
pub struct SuiteContext {
    pub client: Client,
    pub cli: KubeCli,
    pub is_openshift: bool,
    pub config: Arc<SuiteConfig>,
    pub flags: Arc<Flags>,
    pub suite_id: String,
    pub selenium: Option<SeleniumInfo>,
    /// Broker reachable from outside, for the serdes functional tests
    pub shared_kafka: Option<Arc<KafkaClusterInfo>>,
}

impl SuiteContext {
    pub fn new(client: Client, is_openshift: bool, config: SuiteConfig, flags: Flags) -> Self {
        let suite_id = flags
            .suite_id
            .clone()
            .unwrap_or_else(|| default_suite_id(flags.installer).to_string());
        Self {
            client,
            cli: KubeCli::new(CliBinary::for_cluster(is_openshift)),
            is_openshift,
            config: Arc::new(config),
            flags: Arc::new(flags),
            suite_id,
            selenium: None,
            shared_kafka: None,
        }
    }

    /// Root of this run's log tree
    pub fn logs_dir(&self) -> PathBuf {
        self.config.logs_dir(&self.suite_id)
    }

    /// Human readable suite name for reports
    pub fn suite_name(&self) -> String {
        format!("Operator {} Testsuite", self.suite_id)
    }

    /// A context whose client points at a closed port, for tests that
    /// never reach the API server
    #[cfg(test)]
    pub(crate) fn offline(config: SuiteConfig, flags: Flags) -> Self {
        let cluster_url = "http://127.0.0.1:9".parse().expect("cluster url");
        let client = Client::try_from(kube::Config::new(cluster_url)).expect("offline client");
        Self::new(client, false, config, flags)
    }
}

impl std::fmt::Debug for SuiteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiteContext")
            .field("suite_id", &self.suite_id)
            .field("is_openshift", &self.is_openshift)
            .field("cli", &self.cli)
            .field("selenium", &self.selenium)
            .field("shared_kafka", &self.shared_kafka)
            .finish_non_exhaustive()
    }
}

pub fn default_suite_id(installer: InstallerKind) -> &'static str {
    match installer {
        InstallerKind::Bundle => "bundle",
        InstallerKind::Olm => "olm",
        InstallerKind::OlmClusterwide => "olm-clusterwide",
    }
}

/// A bootstrapped suite, ready to run scenarios
pub struct Suite {
    pub ctx: SuiteContext,
    teardown: CleanupStack,
}

impl Suite {
    /// Connect and bring up the shared infrastructure
    ///
    /// A failing step tears down the steps before it before the error is
    /// returned.
    pub async fn bootstrap(config: SuiteConfig, flags: Flags) -> Result<Self> {
        let client = Client::try_default().await?;
        let is_openshift = k8s::is_openshift(&client).await?;
        if is_openshift {
            info!("OpenShift cluster detected");
        }
        let ctx = SuiteContext::new(client, is_openshift, config, flags);
        info!(suite = %ctx.suite_id, installer = ?ctx.flags.installer, "Bootstrapping suite");

        let mut suite = Suite {
            ctx,
            teardown: CleanupStack::new(),
        };
        if let Err(e) = suite.bring_up().await {
            error!(error = %e, "Suite bootstrap failed, tearing down");
            if let Err(teardown) = suite.teardown.execute().await {
                error!(error = %teardown, "Teardown after failed bootstrap failed");
            }
            return Err(e);
        }
        Ok(suite)
    }

    async fn bring_up(&mut self) -> Result<()> {
        if self.ctx.config.needs_selenium(&self.ctx.flags) {
            let info = selenium::deploy_selenium(&self.ctx).await;
            let ctx = self.ctx.clone();
            self.teardown.register("remove selenium", move || {
                async move { selenium::remove_selenium(&ctx).await }.boxed()
            });
            self.ctx.selenium = Some(info?);
        }

        if self.ctx.config.needs_shared_kafka() {
            let request = KafkaClusterRequest::shared(SHARED_KAFKA_NAMESPACE);
            k8s::create_namespace(&self.ctx.client, SHARED_KAFKA_NAMESPACE, self.ctx.config.pull_secret.as_ref())
                .await?;
            let client = self.ctx.client.clone();
            self.teardown.register("delete shared kafka namespace", move || {
                async move { k8s::delete_namespace(&client, SHARED_KAFKA_NAMESPACE).await }.boxed()
            });
            let mut owned = kafka::deploy_kafka_cluster(&self.ctx, &request).await?;
            let shared = owned.borrowed();
            let ctx = self.ctx.clone();
            self.teardown.register("remove shared kafka", move || {
                async move { kafka::remove_kafka_cluster(&ctx, &mut owned).await }.boxed()
            });
            self.ctx.shared_kafka = Some(Arc::new(shared));
        }

        // A failed install removes what it created before returning
        let installer = OperatorInstaller::from(self.ctx.flags.installer);
        let installation = installer.install(&self.ctx).await?;
        let ctx = self.ctx.clone();
        self.teardown.register("uninstall operator", move || {
            async move { installer.uninstall(&ctx, &installation).await }.boxed()
        });
        Ok(())
    }

    /// Run every scenario of the catalog
    pub async fn run(&self) -> SuiteReport {
        let catalog = scenarios::catalog(&self.ctx.flags, &self.ctx.config);
        runner::run_scenarios(&self.ctx, &catalog).await
    }

    /// Undo the bootstrap, newest step first
    pub async fn teardown(mut self) -> Result<()> {
        info!(suite = %self.ctx.suite_id, "Tearing down suite");
        self.teardown.execute().await
    }
}

#[cfg(test)]
#[path = "suite_test.rs"]
mod tests;
