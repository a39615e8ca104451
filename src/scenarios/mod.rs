//! Scenario catalog
//!
//! Each scenario composes storage deployers, probes and the cleanup stack
//! into one named test case:
//! - StorageScenario: one registry per storage kind, single or clustered,
//!   optionally on a secured broker
//! - MigrationScenario: export/import between two registries
//! - ConvertersScenario: Debezium change events serialized via the registry
//! - BackupRestoreScenario: database dump restored under a new registry
//! - SecurityScenario: Keycloak-protected registries
//! - MultiNamespaceScenario: registries in two namespaces at once
//! - UpgradeScenario: OLM upgrade of a running operator

pub mod backup;
pub mod converters;
pub mod migration;
pub mod multinamespace;
pub mod security;
pub mod upgrade;

use crate::config::{Flags, SuiteConfig};
use crate::context::{catch_panic, first_failure, TestContext};
use crate::error::Result;
use crate::kafka::KafkaAuth;
use crate::probe;
use crate::storage::{deployer_for, StorageDeployer, StorageKind};
use crate::suite::logs;
use crate::suite::SuiteContext;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{error, info, warn};

/// A named test case the runner can execute
#[async_trait]
pub trait Scenario: Send + Sync {
    /// Unique name, also matched by `--focus`
    fn name(&self) -> String;

    /// True when the suite flags disable this scenario
    fn should_skip(&self, flags: &Flags) -> bool;

    async fn run(&self, suite: &SuiteContext) -> Result<()>;
}

/// Every scenario, in execution order
///
/// Flag-dependent scenarios are always listed; the runner reports them as
/// skipped.
pub fn catalog(flags: &Flags, config: &SuiteConfig) -> Vec<Box<dyn Scenario>> {
    let mut scenarios: Vec<Box<dyn Scenario>> = StorageKind::ALL
        .iter()
        .map(|&kind| Box::new(StorageScenario::basic(kind)) as Box<dyn Scenario>)
        .collect();

    for kind in [StorageKind::Sql, StorageKind::KafkaSql] {
        scenarios.push(Box::new(StorageScenario::clustered(kind)));
    }
    for auth in [KafkaAuth::Tls, KafkaAuth::Scram] {
        scenarios.push(Box::new(StorageScenario::secured_kafkasql(auth)));
    }

    scenarios.push(Box::new(migration::MigrationScenario));
    scenarios.push(Box::new(converters::ConvertersScenario));
    scenarios.push(Box::new(backup::BackupRestoreScenario));
    scenarios.push(Box::new(security::SecurityScenario));
    scenarios.push(Box::new(multinamespace::MultiNamespaceScenario));
    scenarios.push(Box::new(upgrade::UpgradeScenario));

    info!(
        scenarios = scenarios.len(),
        installer = ?flags.installer,
        profile = %config.effective_tests_profile(),
        "Scenario catalog built"
    );
    scenarios
}

/// Run `body` against a context, then tear the context down
///
/// Teardown always happens, in this order: the namespace logs are saved,
/// the registry and storage are removed through `deployer` (when given),
/// then the context's own cleanups run. Storage is the newest resource
/// most bodies create, so it goes before anything the body registered.
///
/// # Returns
/// The body's error (a panic included) first, otherwise the first teardown
/// failure.
pub async fn run_in_context<F>(
    suite: &SuiteContext,
    ctx: &mut TestContext,
    deployer: Option<&dyn StorageDeployer>,
    body: F,
) -> Result<()>
where
    F: for<'a> FnOnce(&'a SuiteContext, &'a mut TestContext) -> BoxFuture<'a, Result<()>> + Send,
{
    let id = ctx.id.clone();
    info!(scenario = %id, namespace = %ctx.namespace, storage = %ctx.storage, "Running test context");

    let result = catch_panic(&id, body(suite, &mut *ctx)).await;
    if let Err(e) = &result {
        error!(scenario = %id, error = %e, "Test context failed, tearing down");
    }

    if let Err(e) =
        logs::save_namespace_logs(&suite.client, &suite.cli, &suite.logs_dir(), &id, &ctx.namespace).await
    {
        warn!(scenario = %id, error = %e, "Failed to save namespace logs");
    }

    let removal = match deployer {
        Some(deployer) => catch_panic(&id, deployer.remove(suite, &mut *ctx)).await,
        None => Ok(()),
    };
    let cleanups = ctx.cleanups.execute().await;
    first_failure(result, vec![removal, cleanups])
}

/// Deploy the context's storage, probe it, then run the functional tests
///
/// The functional run is left out when the context or `--only-test-operator`
/// says so.
pub async fn execute_test_on_storage(suite: &SuiteContext, ctx: &mut TestContext) -> Result<()> {
    let deployer = deployer_for(ctx.storage);
    run_in_context(suite, ctx, Some(deployer.as_ref()), |suite, ctx| {
        async move {
            deployer_for(ctx.storage).deploy(suite, ctx).await?;
            probe::basic_api_probe(ctx).await?;
            if ctx.skip_functional_tests || suite.flags.only_test_operator {
                info!(scenario = %ctx.id, "Skipping functional tests");
                return Ok(());
            }
            probe::execute_functional_tests(suite, ctx).await
        }
        .boxed()
    })
    .await
}

/// Register the removal of a secondary registry on `owner`
///
/// `ctx` is consumed: its storage is removed, then its own cleanups run.
pub(crate) fn register_storage_removal(owner: &mut TestContext, suite: &SuiteContext, mut ctx: TestContext) {
    let suite = suite.clone();
    let name = format!("remove {} registry {}", ctx.storage, ctx.registry_name);
    owner.cleanups.register(name, move || {
        async move {
            let removal = deployer_for(ctx.storage).remove(&suite, &mut ctx).await;
            let cleanups = ctx.cleanups.execute().await;
            first_failure(removal, vec![cleanups])
        }
        .boxed()
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageGroup {
    Basic,
    Clustered,
    Secured,
}

/// One registry on one storage kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageScenario {
    pub storage: StorageKind,
    pub replicas: i32,
    pub security: Option<KafkaAuth>,
    group: StorageGroup,
}

impl StorageScenario {
    pub fn basic(storage: StorageKind) -> Self {
        Self {
            storage,
            replicas: 1,
            security: None,
            group: StorageGroup::Basic,
        }
    }

    /// Three registry replicas; skipped by `--disable-clustered-tests`
    pub fn clustered(storage: StorageKind) -> Self {
        Self {
            storage,
            replicas: 3,
            security: None,
            group: StorageGroup::Clustered,
        }
    }

    /// Kafkasql on a tls or scram broker; runs only with
    /// `--only-test-operator`
    pub fn secured_kafkasql(auth: KafkaAuth) -> Self {
        Self {
            storage: StorageKind::KafkaSql,
            replicas: 1,
            security: Some(auth),
            group: StorageGroup::Secured,
        }
    }

    pub fn context(&self) -> TestContext {
        let mut ctx = TestContext::new(self.storage)
            .with_id(self.name())
            .with_replicas(self.replicas);
        if let Some(auth) = self.security {
            ctx = ctx.with_security(auth);
        }
        ctx
    }
}

#[async_trait]
impl Scenario for StorageScenario {
    fn name(&self) -> String {
        match (self.group, self.security) {
            (StorageGroup::Clustered, _) => format!("clustered-{}", self.storage),
            (_, Some(auth)) => format!("{}-{}", self.storage, auth),
            _ => self.storage.to_string(),
        }
    }

    fn should_skip(&self, flags: &Flags) -> bool {
        match self.group {
            StorageGroup::Basic => false,
            StorageGroup::Clustered => flags.disable_clustered_tests,
            StorageGroup::Secured => !flags.only_test_operator,
        }
    }

    async fn run(&self, suite: &SuiteContext) -> Result<()> {
        let mut ctx = self.context();
        execute_test_on_storage(suite, &mut ctx).await
    }
}

#[cfg(test)]
#[path = "scenarios_test.rs"]
mod tests;
