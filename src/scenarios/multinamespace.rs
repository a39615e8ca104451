//! Registries in two namespaces watched by one cluster-wide operator

use super::{run_in_context, Scenario};
use crate::config::{Flags, InstallerKind};
use crate::context::TestContext;
use crate::error::Result;
use crate::k8s;
use crate::probe;
use crate::registry::RegistryClient;
use crate::storage::{deployer_for, StorageKind};
use crate::suite::SuiteContext;
use async_trait::async_trait;
use futures::FutureExt;
use tracing::info;

pub const NAME: &str = "multinamespace";
pub const NAMESPACE_PREFIX: &str = "test-multinamespace";
pub const STORAGE: StorageKind = StorageKind::Infinispan;

/// Context whose namespace, id and registry name are all
/// `test-multinamespace-<index>`
///
/// Distinct registry names keep the nip.io hosts apart.
pub fn namespace_context(index: usize) -> TestContext {
    let id = format!("{}-{}", NAMESPACE_PREFIX, index);
    let mut ctx = TestContext::new(STORAGE)
        .with_id(id.clone())
        .with_namespace(id.clone());
    ctx.registry_name = id;
    ctx.skip_functional_tests = true;
    ctx
}

async fn deploy_in_own_namespace(suite: &SuiteContext, ctx: &mut TestContext) -> Result<()> {
    let (client, namespace) = (suite.client.clone(), ctx.namespace.clone());
    ctx.cleanups.register(format!("delete namespace {}", namespace), move || {
        async move { k8s::delete_namespace(&client, &namespace).await }.boxed()
    });
    k8s::create_namespace(&suite.client, &ctx.namespace, suite.config.pull_secret.as_ref()).await?;

    deployer_for(ctx.storage).deploy(suite, ctx).await?;
    probe::basic_api_probe(ctx).await
}

pub struct MultiNamespaceScenario;

#[async_trait]
impl Scenario for MultiNamespaceScenario {
    fn name(&self) -> String {
        NAME.to_string()
    }

    /// Only a cluster-wide operator watches more than its own namespace
    fn should_skip(&self, flags: &Flags) -> bool {
        flags.installer != InstallerKind::OlmClusterwide
    }

    async fn run(&self, suite: &SuiteContext) -> Result<()> {
        let mut first = namespace_context(1);
        let deployer = deployer_for(STORAGE);

        run_in_context(suite, &mut first, Some(deployer.as_ref()), |suite, first| {
            async move {
                deploy_in_own_namespace(suite, first).await?;
                let (host, port) = first.registry_endpoint()?;
                let (host, port) = (host.to_string(), port);

                let mut second = namespace_context(2);
                let deployer = deployer_for(STORAGE);
                run_in_context(suite, &mut second, Some(deployer.as_ref()), move |suite, second| {
                    async move {
                        deploy_in_own_namespace(suite, second).await?;
                        info!(host = %host, "Checking the first registry still answers");
                        RegistryClient::new(&host, port)?.list_artifacts().await?;
                        Ok(())
                    }
                    .boxed()
                })
                .await
            }
            .boxed()
        })
        .await
    }
}
