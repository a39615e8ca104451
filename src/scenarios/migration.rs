//! Data migration between two registries
//!
//! A sql source and a kafkasql destination run side by side; the
//! functional `migration` profile exports from one and imports into the
//! other.

use super::{register_storage_removal, run_in_context, Scenario};
use crate::config::Flags;
use crate::context::TestContext;
use crate::error::Result;
use crate::probe;
use crate::storage::{deployer_for, StorageKind};
use crate::suite::SuiteContext;
use async_trait::async_trait;
use futures::FutureExt;

pub const NAME: &str = "migration";
pub const SOURCE_REGISTRY: &str = "source-registry";
pub const DEST_REGISTRY: &str = "dest-registry";
pub const PROFILE: &str = "migration";

pub const SOURCE_STORAGE: StorageKind = StorageKind::Sql;
pub const DEST_STORAGE: StorageKind = StorageKind::KafkaSql;

/// Context for one side of the migration
pub fn side_context(owner: &TestContext, side: &str, storage: StorageKind, registry: &str) -> TestContext {
    let mut ctx = TestContext::new(storage)
        .with_id(format!("{}-{}", side, owner.id))
        .with_namespace(owner.namespace.clone());
    ctx.registry_name = registry.to_string();
    ctx
}

/// Endpoints of both registries for the `migration` profile
pub fn migration_env(source: &TestContext, dest: &TestContext) -> Result<Vec<(String, String)>> {
    let (source_host, source_port) = source.registry_endpoint()?;
    let (dest_host, dest_port) = dest.registry_endpoint()?;
    Ok(vec![
        ("SOURCE_REGISTRY_HOST".to_string(), source_host.to_string()),
        ("SOURCE_REGISTRY_PORT".to_string(), source_port.to_string()),
        ("DEST_REGISTRY_HOST".to_string(), dest_host.to_string()),
        ("DEST_REGISTRY_PORT".to_string(), dest_port.to_string()),
    ])
}

/// Deploy one side and hand its removal to the owner's cleanups
///
/// The removal is registered even when the deploy fails half way.
async fn deploy_side(suite: &SuiteContext, owner: &mut TestContext, mut side: TestContext) -> Result<TestContext> {
    let deployed = deployer_for(side.storage).deploy(suite, &mut side).await;
    let endpoints = side_endpoints(&side);
    register_storage_removal(owner, suite, side);
    deployed?;
    Ok(endpoints)
}

/// A cleanup-free copy holding just what the probes need
fn side_endpoints(side: &TestContext) -> TestContext {
    let mut copy = TestContext::new(side.storage)
        .with_id(side.id.clone())
        .with_namespace(side.namespace.clone());
    copy.registry_name = side.registry_name.clone();
    copy.registry_host = side.registry_host.clone();
    copy.registry_port = side.registry_port;
    copy.registry_internal_host = side.registry_internal_host.clone();
    copy.registry_internal_port = side.registry_internal_port;
    copy
}

pub struct MigrationScenario;

#[async_trait]
impl Scenario for MigrationScenario {
    fn name(&self) -> String {
        NAME.to_string()
    }

    /// Purely functional, nothing to check with `--only-test-operator`
    fn should_skip(&self, flags: &Flags) -> bool {
        flags.only_test_operator
    }

    async fn run(&self, suite: &SuiteContext) -> Result<()> {
        let mut ctx = TestContext::new(SOURCE_STORAGE).with_id(NAME);
        ctx.functional_profile = Some(PROFILE.to_string());

        run_in_context(suite, &mut ctx, None, |suite, ctx| {
            async move {
                let source = side_context(ctx, "source", SOURCE_STORAGE, SOURCE_REGISTRY);
                let source = deploy_side(suite, ctx, source).await?;
                probe::basic_api_probe(&source).await?;

                let dest = side_context(ctx, "dest", DEST_STORAGE, DEST_REGISTRY);
                let dest = deploy_side(suite, ctx, dest).await?;
                probe::basic_api_probe(&dest).await?;

                ctx.extra_env.extend(migration_env(&source, &dest)?);
                probe::execute_functional_tests(suite, ctx).await
            }
            .boxed()
        })
        .await
    }
}
