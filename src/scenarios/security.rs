//! Keycloak-protected registries
//!
//! One Keycloak serves every registry of the scenario. Each registry is
//! probed with a token for every realm user.

use super::{run_in_context, Scenario};
use crate::config::{Flags, OPERATOR_NAMESPACE};
use crate::context::{catch_panic, first_failure, TestContext};
use crate::error::{Error, Result};
use crate::keycloak::{self, KeycloakInfo, USERS, USER_PASSWORD};
use crate::probe;
use crate::storage::{deployer_for, StorageKind};
use crate::suite::SuiteContext;
use async_trait::async_trait;
use futures::FutureExt;
use tracing::{info, warn};

pub const NAME: &str = "security";
pub const SECURED_STORAGES: [StorageKind; 2] = [StorageKind::Sql, StorageKind::KafkaSql];
pub const ARTIFACT_PREFIX: &str = "secured";
pub const ARTIFACT_COUNT: usize = 3;

/// Context for a registry authenticating against `keycloak`
pub fn secured_context(storage: StorageKind, keycloak: &KeycloakInfo) -> TestContext {
    let mut ctx = TestContext::new(storage)
        .with_id(format!("{}-{}", NAME, storage))
        .with_namespace(keycloak.namespace.clone());
    ctx.keycloak = Some(keycloak.clone());
    ctx.skip_functional_tests = true;
    ctx
}

async fn secured_registry(suite: &SuiteContext, keycloak: &KeycloakInfo, storage: StorageKind) -> Result<()> {
    let mut ctx = secured_context(storage, keycloak);
    let deployer = deployer_for(storage);
    run_in_context(suite, &mut ctx, Some(deployer.as_ref()), |suite, ctx| {
        async move {
            deployer_for(ctx.storage).deploy(suite, ctx).await?;
            for (user, role) in USERS {
                info!(scenario = %ctx.id, user = %user, role = %role, "Probing with access token");
                probe::auth_api_probe(ctx, user, USER_PASSWORD).await?;
            }
            write_as_admin(ctx).await
        }
        .boxed()
    })
    .await
}

/// The admin role can write through an authenticated client
async fn write_as_admin(ctx: &TestContext) -> Result<()> {
    let (admin, _) = USERS[0];
    let keycloak = ctx
        .keycloak
        .as_ref()
        .ok_or_else(|| Error::MissingField(format!("keycloak for {}", ctx.id)))?;
    let token =
        probe::issue_access_token(&keycloak.token_url(), &keycloak.api_client_id, admin, USER_PASSWORD).await?;
    let client = ctx.registry_client()?.with_bearer_token(token);
    client.create_artifacts(ARTIFACT_PREFIX, ARTIFACT_COUNT).await?;
    client.verify_artifacts(ARTIFACT_PREFIX, ARTIFACT_COUNT).await
}

pub struct SecurityScenario;

#[async_trait]
impl Scenario for SecurityScenario {
    fn name(&self) -> String {
        NAME.to_string()
    }

    fn should_skip(&self, flags: &Flags) -> bool {
        flags.disable_auth_tests
    }

    async fn run(&self, suite: &SuiteContext) -> Result<()> {
        let keycloak = match keycloak::deploy_keycloak(suite, OPERATOR_NAMESPACE).await {
            Ok(info) => info,
            Err(e) => {
                // Whatever got created before the failure
                let partial = KeycloakInfo::new("", OPERATOR_NAMESPACE);
                if let Err(removal) = keycloak::remove_keycloak(suite, &partial).await {
                    warn!(error = %removal, "Failed to remove partially deployed keycloak");
                }
                return Err(e);
            }
        };

        let mut results = Vec::with_capacity(SECURED_STORAGES.len() + 1);
        for storage in SECURED_STORAGES {
            results.push(secured_registry(suite, &keycloak, storage).await);
        }
        results.push(catch_panic("remove keycloak", keycloak::remove_keycloak(suite, &keycloak)).await);
        first_failure(Ok(()), results)
    }
}
