//! The managed ApicurioRegistry resource
//!
//! Creating a registry means: create the CR, wait for the operator to
//! reconcile it into a Deployment with the requested replicas, then record
//! how the service is reached from outside (nip.io ingress or OpenShift
//! Route) and from inside the cluster (Service DNS name).

pub mod client;
mod crd;

pub use client::RegistryClient;
pub use crd::*;

use crate::context::TestContext;
use crate::error::{is_not_found, Error, Result};
use crate::k8s;
use crate::suite::SuiteContext;
use crate::wait::Poller;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::core::DynamicObject;
use std::time::Duration;
use tracing::info;

const CR_READY_TIMEOUT: Duration = Duration::from_secs(15);
const DEPLOYMENT_READY_TIMEOUT: Duration = Duration::from_secs(180);
const CLUSTERED_DEPLOYMENT_READY_TIMEOUT: Duration = Duration::from_secs(300);
const ROUTE_READY_TIMEOUT: Duration = Duration::from_secs(90);
const CR_DELETE_TIMEOUT: Duration = Duration::from_secs(15);
const DEPLOYMENT_DELETE_TIMEOUT: Duration = Duration::from_secs(30);

/// Port the nip.io ingress and OpenShift routes listen on
pub const EXTERNAL_PORT: u16 = 80;

/// Default CR name for a storage kind
pub fn registry_name(storage: &str) -> String {
    format!("apicurio-registry-{}", storage)
}

/// Externally reachable host on clusters without routes
pub fn nip_io_host(name: &str) -> String {
    format!("{}.127.0.0.1.nip.io", name)
}

/// Label the operator puts on everything it creates for a registry
pub fn app_selector(name: &str) -> String {
    format!("app={}", name)
}

/// A registry CR with the given configuration
pub fn registry(name: &str, namespace: &str, configuration: Configuration) -> ApicurioRegistry {
    let mut registry = ApicurioRegistry::new(
        name,
        ApicurioRegistrySpec {
            configuration,
            deployment: None,
        },
    );
    registry.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    };
    registry
}

/// `status.ingress[0].host` of an OpenShift Route
pub fn route_host(route: &DynamicObject) -> Option<&str> {
    route
        .data
        .get("status")?
        .get("ingress")?
        .get(0)?
        .get("host")?
        .as_str()
        .filter(|h| !h.is_empty())
}

/// `<service>.<namespace>` and the first service port
pub fn internal_endpoint(service: &Service) -> Option<(String, u16)> {
    let name = service.metadata.name.as_deref()?;
    let namespace = service.metadata.namespace.as_deref()?;
    let port = service.spec.as_ref()?.ports.as_ref()?.first()?.port;
    Some((format!("{}.{}", name, namespace), u16::try_from(port).ok()?))
}

/// Create a registry CR and wait until it is serving
///
/// Fills the context's registry name, external and internal endpoints.
/// The CR lands in the context namespace unless it already names one.
pub async fn create_registry_and_wait(
    suite: &SuiteContext,
    ctx: &mut TestContext,
    mut registry: ApicurioRegistry,
) -> Result<()> {
    let name = registry
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::MissingField("registry metadata.name".to_string()))?;
    let namespace = registry
        .metadata
        .namespace
        .get_or_insert_with(|| ctx.namespace.clone())
        .clone();
    ctx.registry_name = name.clone();

    if let Some(keycloak) = &ctx.keycloak {
        registry
            .spec
            .configuration
            .security
            .get_or_insert_with(Default::default)
            .keycloak = Some(keycloak.registry_security());
    }

    let replicas = k8s::effective_replicas(ctx.replicas);
    let deployment = registry.spec.deployment.get_or_insert_with(Default::default);
    if ctx.replicas > 1 {
        deployment.replicas = Some(ctx.replicas);
    }
    if !suite.is_openshift {
        let host = nip_io_host(&name);
        deployment.host = Some(host.clone());
        ctx.registry_host = Some(host);
        ctx.registry_port = EXTERNAL_PORT;
    }

    info!(registry = %name, namespace = %namespace, replicas, "Creating registry");
    let registries: Api<ApicurioRegistry> = Api::namespaced(suite.client.clone(), &namespace);
    registries.create(&PostParams::default(), &registry).await?;

    wait_for_registry_ready(suite, &namespace, &name, replicas).await?;

    let selector = app_selector(&name);
    if suite.is_openshift {
        ctx.registry_host = Some(wait_for_route_host(suite, &namespace, &selector).await?);
        ctx.registry_port = EXTERNAL_PORT;
    }

    let services: Api<Service> = Api::namespaced(suite.client.clone(), &namespace);
    let list = services
        .list(&ListParams::default().labels(&selector))
        .await?;
    let (host, port) = list
        .items
        .first()
        .and_then(internal_endpoint)
        .ok_or_else(|| Error::MissingField(format!("service [{}] in {}", selector, namespace)))?;
    ctx.registry_internal_host = Some(host);
    ctx.registry_internal_port = port;

    info!(
        registry = %name,
        host = ?ctx.registry_host,
        internal_host = ?ctx.registry_internal_host,
        "Registry is ready"
    );
    Ok(())
}

/// Wait for the CR, then for its Deployment to reach `replicas`
pub async fn wait_for_registry_ready(
    suite: &SuiteContext,
    namespace: &str,
    name: &str,
    replicas: i32,
) -> Result<()> {
    let registries: Api<ApicurioRegistry> = Api::namespaced(suite.client.clone(), namespace);
    let found = Poller::new(CR_READY_TIMEOUT)
        .until_present(&format!("apicurioregistry {}/{}", namespace, name), &registries, name)
        .await;
    suite
        .cli
        .execute(&["get", "apicurioregistry", "-n", namespace])
        .await
        .ok();
    found?;

    let timeout = if replicas > 1 {
        CLUSTERED_DEPLOYMENT_READY_TIMEOUT
    } else {
        DEPLOYMENT_READY_TIMEOUT
    };
    let ready = k8s::wait_for_labeled_deployment_ready(
        &suite.client,
        &suite.cli,
        namespace,
        &app_selector(name),
        replicas,
        timeout,
    )
    .await;
    if ready.is_err() {
        suite.cli.dump_yaml(namespace, "apicurioregistry").await;
    }
    ready
}

async fn wait_for_route_host(suite: &SuiteContext, namespace: &str, selector: &str) -> Result<String> {
    let routes: Api<DynamicObject> =
        Api::namespaced_with(suite.client.clone(), namespace, &k8s::route_resource());

    let ready = Poller::new(ROUTE_READY_TIMEOUT)
        .until(&format!("route {}/[{}]", namespace, selector), || {
            let routes = routes.clone();
            async move {
                let list = routes.list(&ListParams::default().labels(selector)).await?;
                Ok(list.items.first().and_then(route_host).is_some())
            }
        })
        .await;
    suite
        .cli
        .execute(&["get", "route", "-n", namespace])
        .await
        .ok();
    ready?;

    let list = routes.list(&ListParams::default().labels(selector)).await?;
    list.items
        .first()
        .and_then(route_host)
        .map(str::to_string)
        .ok_or_else(|| Error::MissingField(format!("route [{}] ingress host", selector)))
}

/// Delete a registry CR and wait for it and its Deployment to go away
pub async fn delete_registry_and_wait(suite: &SuiteContext, namespace: &str, name: &str) -> Result<()> {
    let registries: Api<ApicurioRegistry> = Api::namespaced(suite.client.clone(), namespace);

    info!(registry = %name, namespace = %namespace, "Removing registry");
    match registries.delete(name, &DeleteParams::default()).await {
        Ok(_) => {}
        Err(e) if is_not_found(&e) => {}
        Err(e) => return Err(e.into()),
    }

    let removed = Poller::new(CR_DELETE_TIMEOUT)
        .until_absent(&format!("apicurioregistry {}/{} removal", namespace, name), &registries, name)
        .await;
    suite
        .cli
        .execute(&["get", "apicurioregistry", "-n", namespace])
        .await
        .ok();
    removed?;

    let deployments: Api<Deployment> = Api::namespaced(suite.client.clone(), namespace);
    let selector = app_selector(name);
    Poller::new(DEPLOYMENT_DELETE_TIMEOUT)
        .until(&format!("deployment {}/[{}] removal", namespace, selector), || {
            let deployments = deployments.clone();
            let selector = selector.clone();
            async move {
                match deployments.list(&ListParams::default().labels(&selector)).await {
                    Ok(list) => Ok(list.items.is_empty()),
                    Err(e) if is_not_found(&e) => Ok(true),
                    Err(e) => Err(e.into()),
                }
            }
        })
        .await
}

/// True if the named registry CR exists
pub async fn registry_exists(suite: &SuiteContext, namespace: &str, name: &str) -> Result<bool> {
    let registries: Api<ApicurioRegistry> = Api::namespaced(suite.client.clone(), namespace);
    Ok(registries.get_opt(name).await?.is_some())
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
