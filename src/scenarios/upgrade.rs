//! OLM upgrade of a running operator
//!
//! An old operator version is installed from its own catalog into a
//! dedicated namespace, a sql registry is filled with artifacts, then the
//! subscription is switched to the catalog under test. The registry must
//! come back with every artifact once the new CSV has taken over.

use super::{run_in_context, Scenario};
use crate::config::{Flags, InstallerKind, SuiteConfig};
use crate::context::TestContext;
use crate::error::{Error, Result};
use crate::k8s;
use crate::olm::{self, ObjectRef, SubscriptionRequest};
use crate::probe;
use crate::registry;
use crate::storage::{deployer_for, StorageKind};
use crate::suite::SuiteContext;
use async_trait::async_trait;
use futures::FutureExt;
use tracing::info;

pub const NAME: &str = "upgrade";
pub const NAMESPACE: &str = "apicurio-registry-e2e-upgrade";
pub const OPERATOR_GROUP: &str = "registry-upgrade-group";
pub const SUBSCRIPTION: &str = "registry-upgrade-sub";
pub const CATALOG_SOURCE: &str = "registry-upgrade-catalog";
pub const ARTIFACT_PREFIX: &str = "upgrd";
pub const ARTIFACT_COUNT: usize = 50;

/// Resolved upgrade settings, all of them required
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePlan {
    pub package: String,
    pub channel: String,
    pub old_catalog: String,
    pub old_catalog_namespace: String,
    pub old_csv: String,
    pub new_csv: String,
    pub catalog_image: String,
}

impl UpgradePlan {
    pub fn from_config(config: &SuiteConfig) -> Result<Self> {
        let olm = &config.olm;
        let upgrade = &olm.upgrade;
        let (
            Some(channel),
            Some(old_catalog),
            Some(old_catalog_namespace),
            Some(old_csv),
            Some(new_csv),
        ) = (
            &upgrade.channel,
            &upgrade.old_catalog,
            &upgrade.old_catalog_namespace,
            &upgrade.old_csv,
            &upgrade.new_csv,
        )
        else {
            return Err(Error::Config(
                "upgrade channel, old catalog, old catalog namespace, old CSV and new CSV are required"
                    .to_string(),
            ));
        };
        let catalog_image = olm
            .catalog_source_image
            .clone()
            .ok_or_else(|| Error::Config("catalog source image is required for upgrades".to_string()))?;

        Ok(Self {
            package: olm.package_manifest_name.clone(),
            channel: channel.clone(),
            old_catalog: old_catalog.clone(),
            old_catalog_namespace: old_catalog_namespace.clone(),
            old_csv: old_csv.clone(),
            new_csv: new_csv.clone(),
            catalog_image,
        })
    }

    /// Subscription pinned to the old CSV in the old catalog
    pub fn old_subscription(&self) -> SubscriptionRequest {
        SubscriptionRequest {
            name: SUBSCRIPTION.to_string(),
            namespace: NAMESPACE.to_string(),
            package: self.package.clone(),
            catalog_source: self.old_catalog.clone(),
            catalog_source_namespace: self.old_catalog_namespace.clone(),
            channel: self.channel.clone(),
            starting_csv: self.old_csv.clone(),
        }
    }
}

/// Install the old operator version, registering each undo step first
async fn install_old_operator(suite: &SuiteContext, ctx: &mut TestContext, plan: &UpgradePlan) -> Result<()> {
    let client = suite.client.clone();

    let owner = client.clone();
    ctx.cleanups.register(format!("delete namespace {}", NAMESPACE), move || {
        async move { k8s::delete_namespace(&owner, NAMESPACE).await }.boxed()
    });
    k8s::create_namespace(&client, NAMESPACE, suite.config.pull_secret.as_ref()).await?;

    let owner = client.clone();
    ctx.cleanups.register(format!("delete operator group {}", OPERATOR_GROUP), move || {
        async move { olm::delete_operator_group(&owner, NAMESPACE, OPERATOR_GROUP).await }.boxed()
    });
    olm::create_operator_group(&client, NAMESPACE, OPERATOR_GROUP).await?;

    let (owner, old_csv, new_csv) = (client.clone(), plan.old_csv.clone(), plan.new_csv.clone());
    ctx.cleanups.register(format!("delete subscription {}", SUBSCRIPTION), move || {
        async move {
            let sub = ObjectRef::new(SUBSCRIPTION, NAMESPACE);
            // The old CSV is gone already when the upgrade went through
            olm::delete_subscription(&owner, &sub, Some(&old_csv), false).await?;
            olm::delete_subscription(&owner, &sub, Some(&new_csv), true).await
        }
        .boxed()
    });
    olm::create_subscription(&client, &plan.old_subscription()).await?;

    olm::wait_for_csv_succeeded(&client, NAMESPACE, &plan.old_csv).await?;
    k8s::wait_for_operator_ready(&client, &suite.cli, NAMESPACE).await?;
    info!(csv = %plan.old_csv, "Old operator version installed");
    Ok(())
}

/// Switch the subscription to the catalog under test and wait for the new CSV
async fn upgrade_operator(suite: &SuiteContext, ctx: &mut TestContext, plan: &UpgradePlan) -> Result<()> {
    let client = suite.client.clone();

    let owner = client.clone();
    ctx.cleanups.register(format!("delete catalog source {}", CATALOG_SOURCE), move || {
        async move { olm::delete_catalog_source(&owner, NAMESPACE, CATALOG_SOURCE).await }.boxed()
    });
    olm::create_catalog_source(
        &client,
        &suite.cli,
        suite.is_openshift,
        NAMESPACE,
        CATALOG_SOURCE,
        &plan.catalog_image,
    )
    .await?;

    let sub = ObjectRef::new(SUBSCRIPTION, NAMESPACE);
    olm::update_subscription(&client, &sub, &plan.channel, CATALOG_SOURCE, NAMESPACE).await?;
    olm::wait_for_subscription_csv(&client, &sub, &plan.new_csv).await?;
    olm::wait_for_csv_succeeded(&client, NAMESPACE, &plan.new_csv).await?;
    olm::wait_for_csv_removed(&client, NAMESPACE, &plan.old_csv).await?;
    k8s::wait_for_operator_ready(&client, &suite.cli, NAMESPACE).await?;
    info!(from = %plan.old_csv, to = %plan.new_csv, "Operator upgraded");
    Ok(())
}

async fn upgrade_test(suite: &SuiteContext, ctx: &mut TestContext, plan: &UpgradePlan) -> Result<()> {
    install_old_operator(suite, ctx, plan).await?;

    deployer_for(ctx.storage).deploy(suite, ctx).await?;
    probe::basic_api_probe(ctx).await?;
    let client = ctx.registry_client()?;
    client.create_artifacts(ARTIFACT_PREFIX, ARTIFACT_COUNT).await?;
    client.verify_artifacts(ARTIFACT_PREFIX, ARTIFACT_COUNT).await?;

    upgrade_operator(suite, ctx, plan).await?;

    registry::wait_for_registry_ready(suite, &ctx.namespace, &ctx.registry_name, ctx.replicas).await?;
    probe::basic_api_probe(ctx).await?;
    ctx.registry_client()?
        .verify_artifacts(ARTIFACT_PREFIX, ARTIFACT_COUNT)
        .await
}

pub struct UpgradeScenario;

#[async_trait]
impl Scenario for UpgradeScenario {
    fn name(&self) -> String {
        NAME.to_string()
    }

    /// Needs a namespaced OLM install and `--enable-olm-advanced-tests`
    fn should_skip(&self, flags: &Flags) -> bool {
        !(flags.enable_olm_advanced_tests && flags.installer == InstallerKind::Olm)
    }

    async fn run(&self, suite: &SuiteContext) -> Result<()> {
        let plan = UpgradePlan::from_config(&suite.config)?;
        let mut ctx = TestContext::new(StorageKind::Sql)
            .with_id(NAME)
            .with_namespace(NAMESPACE);
        ctx.skip_functional_tests = true;

        let deployer = deployer_for(StorageKind::Sql);
        run_in_context(suite, &mut ctx, Some(deployer.as_ref()), move |suite, ctx| {
            async move { upgrade_test(suite, ctx, &plan).await }.boxed()
        })
        .await
    }
}
