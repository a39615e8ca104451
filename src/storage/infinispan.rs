use super::{StorageDeployer, StorageKind};
use crate::context::TestContext;
use crate::error::Result;
use crate::registry::{self, Configuration, InfinispanConfig};
use crate::suite::SuiteContext;
use async_trait::async_trait;

pub const CLUSTER_NAME: &str = "registry-application";

pub fn infinispan_configuration() -> Configuration {
    Configuration {
        persistence: Some(StorageKind::Infinispan.to_string()),
        log_level: Some("DEBUG".to_string()),
        infinispan: Some(InfinispanConfig {
            cluster_name: Some(CLUSTER_NAME.to_string()),
        }),
        ..Default::default()
    }
}

/// Embedded cache, no infrastructure besides the registry itself
pub struct InfinispanDeployer;

#[async_trait]
impl StorageDeployer for InfinispanDeployer {
    fn kind(&self) -> StorageKind {
        StorageKind::Infinispan
    }

    async fn deploy(&self, suite: &SuiteContext, ctx: &mut TestContext) -> Result<()> {
        let cr = registry::registry(&ctx.registry_name, &ctx.namespace, infinispan_configuration());
        registry::create_registry_and_wait(suite, ctx, cr).await
    }

    async fn remove(&self, suite: &SuiteContext, ctx: &mut TestContext) -> Result<()> {
        registry::delete_registry_and_wait(suite, &ctx.namespace, &ctx.registry_name).await
    }
}
