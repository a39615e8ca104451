//! Per-scenario state and the cleanup stack
//!
//! A `TestContext` is created when a scenario starts and dropped once its
//! cleanups have run. Everything acquired during setup registers an undo
//! step on `ctx.cleanups`; `CleanupStack::execute` runs them last-in
//! first-out, always all of them, and aggregates every failure.

use crate::config::OPERATOR_NAMESPACE;
use crate::error::{CleanupFailure, Error, Result};
use crate::kafka::{KafkaAuth, KafkaClusterInfo};
use crate::keycloak::KeycloakInfo;
use crate::storage::StorageKind;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, warn};

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Deferred undo steps, executed in reverse registration order
#[derive(Default)]
pub struct CleanupStack {
    entries: Vec<(String, CleanupFn)>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a named cleanup
    ///
    /// The closure must own what it needs; it runs after the scenario body
    /// has returned, possibly by panicking.
    pub fn register<F>(&mut self, name: impl Into<String>, cleanup: F)
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let name = name.into();
        info!(cleanup = %name, pending = self.entries.len() + 1, "Registered cleanup");
        self.entries.push((name, Box::new(cleanup)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every registered cleanup, newest first
    ///
    /// A failing cleanup does not stop the ones registered before it.
    ///
    /// # Returns
    /// * `Ok(())` - Every cleanup succeeded (or none was registered)
    /// * `Err(Error::Cleanup)` - One entry per failed cleanup, in execution order
    pub async fn execute(&mut self) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        info!(count = self.entries.len(), "Executing cleanups");

        let mut failures = Vec::new();
        while let Some((name, cleanup)) = self.entries.pop() {
            let outcome = AssertUnwindSafe(cleanup()).catch_unwind().await;
            let result = outcome.unwrap_or_else(|panic| Err(panic_error(&name, panic)));
            if let Err(e) = result {
                error!(cleanup = %name, error = %e, "Cleanup failed");
                failures.push(CleanupFailure { name, error: e });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Cleanup(failures))
        }
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            let names: Vec<&str> = self.entries.iter().map(|(n, _)| n.as_str()).collect();
            warn!(pending = ?names, "Cleanup stack dropped with cleanups that never ran");
        }
    }
}

impl std::fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(n, _)| n))
            .finish()
    }
}

/// State of one running scenario
#[derive(Debug)]
pub struct TestContext {
    /// Scenario id, also the log directory name
    pub id: String,
    pub storage: StorageKind,
    pub namespace: String,
    pub replicas: i32,
    pub security: Option<KafkaAuth>,

    pub registry_name: String,
    pub registry_host: Option<String>,
    pub registry_port: u16,
    pub registry_internal_host: Option<String>,
    pub registry_internal_port: u16,

    pub kafka: Option<KafkaClusterInfo>,
    pub keycloak: Option<KeycloakInfo>,

    /// Overrides the configured functional test profile
    pub functional_profile: Option<String>,
    /// Extra environment for the functional test run
    pub extra_env: Vec<(String, String)>,

    pub skip_functional_tests: bool,

    pub cleanups: CleanupStack,
}

impl TestContext {
    /// A single-replica context in the operator namespace
    pub fn new(storage: StorageKind) -> Self {
        Self {
            id: storage.to_string(),
            storage,
            namespace: OPERATOR_NAMESPACE.to_string(),
            replicas: 1,
            security: None,
            registry_name: crate::registry::registry_name(storage.as_str()),
            registry_host: None,
            registry_port: 0,
            registry_internal_host: None,
            registry_internal_port: 0,
            kafka: None,
            keycloak: None,
            functional_profile: None,
            extra_env: Vec::new(),
            skip_functional_tests: false,
            cleanups: CleanupStack::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_security(mut self, security: KafkaAuth) -> Self {
        self.security = Some(security);
        self
    }

    /// External `(host, port)`, once the registry is deployed
    pub fn registry_endpoint(&self) -> Result<(&str, u16)> {
        self.registry_host
            .as_deref()
            .map(|host| (host, self.registry_port))
            .ok_or_else(|| Error::MissingField(format!("registry host for {}", self.id)))
    }

    /// In-cluster `(host, port)`, once the registry is deployed
    pub fn registry_internal_endpoint(&self) -> Result<(&str, u16)> {
        self.registry_internal_host
            .as_deref()
            .map(|host| (host, self.registry_internal_port))
            .ok_or_else(|| Error::MissingField(format!("registry internal host for {}", self.id)))
    }

    pub fn registry_client(&self) -> Result<crate::registry::RegistryClient> {
        let (host, port) = self.registry_endpoint()?;
        crate::registry::RegistryClient::new(host, port)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn panic_error(what: &str, panic: Box<dyn Any + Send>) -> Error {
    Error::scenario(format!("{} panicked: {}", what, panic_message(panic.as_ref())))
}

/// Await a future, turning a panic into `Error::Scenario`
pub async fn catch_panic<F>(what: &str, fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(panic_error(what, panic)))
}

/// Merge a body result with the teardown results that followed it
///
/// The body's failure wins; teardown failures are logged in that case.
/// Otherwise the first teardown failure is returned.
pub fn first_failure(body: Result<()>, teardown: Vec<Result<()>>) -> Result<()> {
    let mut teardown_error = None;
    for result in teardown {
        if let Err(e) = result {
            if body.is_err() || teardown_error.is_some() {
                error!(error = %e, "Teardown failed");
            } else {
                teardown_error = Some(e);
            }
        }
    }
    body?;
    teardown_error.map_or(Ok(()), Err)
}

/// Merge the results of independent teardown steps
///
/// Every failure is kept, in step order, inside one `Error::Cleanup`.
pub fn aggregate_failures(results: Vec<(String, Result<()>)>) -> Result<()> {
    let failures: Vec<CleanupFailure> = results
        .into_iter()
        .filter_map(|(name, result)| {
            result.err().map(|error| {
                error!(step = %name, error = %error, "Teardown step failed");
                CleanupFailure { name, error }
            })
        })
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Cleanup(failures))
    }
}

#[cfg(test)]
#[path = "context_test.rs"]
mod tests;
