//! Storage backends for the registry
//!
//! Each `StorageKind` has exactly one `StorageDeployer`. Deploying brings
//! up the backend's infrastructure (database, broker cluster or nothing),
//! creates the registry CR configured for it and fills the context's
//! endpoints. Removing undoes both.

mod infinispan;
mod kafkasql;
pub mod postgres;
pub mod sql;

pub use infinispan::InfinispanDeployer;
pub use kafkasql::KafkaSqlDeployer;
pub use sql::SqlDeployer;

use crate::context::TestContext;
use crate::error::{Error, Result};
use crate::suite::SuiteContext;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Sql,
    KafkaSql,
    Infinispan,
}

impl StorageKind {
    pub const ALL: [StorageKind; 3] = [StorageKind::Sql, StorageKind::KafkaSql, StorageKind::Infinispan];

    /// Value of `configuration.persistence` and of the functional test profile
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Sql => "sql",
            StorageKind::KafkaSql => "kafkasql",
            StorageKind::Infinispan => "infinispan",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sql" => Ok(StorageKind::Sql),
            "kafkasql" => Ok(StorageKind::KafkaSql),
            "infinispan" => Ok(StorageKind::Infinispan),
            other => Err(Error::Config(format!("unknown storage kind: {}", other))),
        }
    }
}

/// Deploy / remove one storage backend plus its registry CR
#[async_trait]
pub trait StorageDeployer: Send + Sync {
    fn kind(&self) -> StorageKind;

    /// Bring up the backend and a registry using it
    ///
    /// On return the context's registry endpoints are filled.
    async fn deploy(&self, suite: &SuiteContext, ctx: &mut TestContext) -> Result<()>;

    /// Remove the registry CR and the backend infrastructure
    ///
    /// Missing objects are not an error. Runs after the context's cleanups.
    async fn remove(&self, suite: &SuiteContext, ctx: &mut TestContext) -> Result<()>;
}

pub fn deployer_for(kind: StorageKind) -> Box<dyn StorageDeployer> {
    match kind {
        StorageKind::Sql => Box::new(SqlDeployer),
        StorageKind::KafkaSql => Box::new(KafkaSqlDeployer),
        StorageKind::Infinispan => Box::new(InfinispanDeployer),
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
