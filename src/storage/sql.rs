use super::postgres::{self, DbData};
use super::{StorageDeployer, StorageKind};
use crate::context::{aggregate_failures, TestContext};
use crate::error::Result;
use crate::registry::{self, Configuration, DataSource, SqlConfig};
use crate::suite::SuiteContext;
use async_trait::async_trait;
use tracing::info;

pub const DATABASE_NAME: &str = "registry-db";
const DATABASE: &str = "apicurioregistry";
const USER: &str = "apicuriouser";
const PASSWORD: &str = "password";

/// Database backing a registry
///
/// The default sql registry uses `registry-db`; any other registry gets
/// its own, so two registries in one namespace never share a database.
pub fn database_name(registry_name: &str) -> String {
    if registry_name == registry::registry_name(StorageKind::Sql.as_str()) {
        DATABASE_NAME.to_string()
    } else {
        format!("{}-db", registry_name)
    }
}

/// Registry configuration for a PostgreSQL database
pub fn sql_configuration(db: &DbData) -> Configuration {
    Configuration {
        persistence: Some(StorageKind::Sql.to_string()),
        log_level: Some("DEBUG".to_string()),
        sql: Some(SqlConfig {
            data_source: DataSource {
                url: db.data_source_url.clone(),
                user_name: db.user.clone(),
                password: db.password.clone(),
            },
        }),
        ..Default::default()
    }
}

/// PostgreSQL database plus a registry pointing at it
pub struct SqlDeployer;

#[async_trait]
impl StorageDeployer for SqlDeployer {
    fn kind(&self) -> StorageKind {
        StorageKind::Sql
    }

    async fn deploy(&self, suite: &SuiteContext, ctx: &mut TestContext) -> Result<()> {
        let db = postgres::deploy_postgresql_database(
            suite,
            &ctx.namespace,
            &database_name(&ctx.registry_name),
            DATABASE,
            USER,
            PASSWORD,
        )
        .await?;

        info!(registry = %ctx.registry_name, url = %db.data_source_url, "Deploying sql registry");
        let cr = registry::registry(&ctx.registry_name, &ctx.namespace, sql_configuration(&db));
        registry::create_registry_and_wait(suite, ctx, cr).await
    }

    async fn remove(&self, suite: &SuiteContext, ctx: &mut TestContext) -> Result<()> {
        let database = database_name(&ctx.registry_name);
        aggregate_failures(vec![
            (
                format!("delete registry {}", ctx.registry_name),
                registry::delete_registry_and_wait(suite, &ctx.namespace, &ctx.registry_name).await,
            ),
            (
                format!("remove database {}", database),
                postgres::remove_postgresql_database(suite, &ctx.namespace, &database).await,
            ),
        ])
    }
}
