//! Kubernetes namespace / Deployment helpers
//!
//! Thin wrappers over `kube::Api` that follow the harness conventions:
//! creation tolerates "already exists", deletion tolerates "not found",
//! and every wait dumps namespace diagnostics before surfacing a timeout.

use crate::cmd::KubeCli;
use crate::config::{PullSecretCredentials, OPERATOR_DEPLOYMENT_NAME, PULL_SECRET_NAME};
use crate::error::{is_already_exists, is_not_found, Error, Result};
use crate::wait::Poller;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{LocalObjectReference, Namespace, Secret, ServiceAccount};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use kube::Client;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{info, warn};

pub const NAMESPACE_DELETE_TIMEOUT: Duration = Duration::from_secs(60);
pub const SERVICE_ACCOUNT_TIMEOUT: Duration = Duration::from_secs(10);
pub const OPERATOR_READY_TIMEOUT: Duration = Duration::from_secs(500);
pub const OPERATOR_REMOVED_TIMEOUT: Duration = Duration::from_secs(60);
pub const OBJECT_DELETE_TIMEOUT: Duration = Duration::from_secs(30);

/// `route.openshift.io/v1` Route, only served on OpenShift
pub fn route_resource() -> ApiResource {
    ApiResource {
        group: "route.openshift.io".to_string(),
        version: "v1".to_string(),
        api_version: "route.openshift.io/v1".to_string(),
        kind: "Route".to_string(),
        plural: "routes".to_string(),
    }
}

/// Route exposing a service, for OpenShift
pub fn service_route(namespace: &str, name: &str, service: &str) -> DynamicObject {
    DynamicObject::new(name, &route_resource())
        .within(namespace)
        .data(serde_json::json!({
            "spec": {
                "path": "/",
                "to": { "kind": "Service", "name": service, "weight": 100 },
            }
        }))
}

/// True when the cluster serves the OpenShift route API
pub async fn is_openshift(client: &Client) -> Result<bool> {
    let groups = client.list_api_groups().await?;
    Ok(groups.groups.iter().any(|g| g.name == "route.openshift.io"))
}

/// Build the docker-registry secret for private image pulls
pub fn pull_secret(namespace: &str, creds: &PullSecretCredentials) -> Secret {
    let config = serde_json::json!({
        "auths": {
            creds.server.as_str(): {
                "username": creds.user,
                "password": creds.password,
            }
        }
    });

    Secret {
        metadata: ObjectMeta {
            name: Some(PULL_SECRET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some("kubernetes.io/dockerconfigjson".to_string()),
        string_data: Some(BTreeMap::from([(
            ".dockerconfigjson".to_string(),
            config.to_string(),
        )])),
        ..Default::default()
    }
}

/// Create a namespace, tolerating "already exists"
///
/// When pull-secret credentials are configured the secret is created in
/// the namespace and attached to its `default` ServiceAccount.
pub async fn create_namespace(
    client: &Client,
    name: &str,
    pull: Option<&PullSecretCredentials>,
) -> Result<()> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => info!(namespace = %name, "Created namespace"),
        Err(e) if is_already_exists(&e) => info!(namespace = %name, "Namespace already exists"),
        Err(e) => return Err(e.into()),
    }

    if let Some(creds) = pull {
        let secrets: Api<Secret> = Api::namespaced(client.clone(), name);
        match secrets
            .create(&PostParams::default(), &pull_secret(name, creds))
            .await
        {
            Ok(_) => info!(namespace = %name, "Created pull secret"),
            Err(e) if is_already_exists(&e) => {}
            Err(e) => return Err(e.into()),
        }
        set_pull_secret(client, name, "default", PULL_SECRET_NAME).await?;
    }

    Ok(())
}

/// Append an image pull secret to a ServiceAccount
///
/// The account is created asynchronously by the controller-manager, so it
/// is waited for first.
pub async fn set_pull_secret(
    client: &Client,
    namespace: &str,
    service_account: &str,
    secret: &str,
) -> Result<()> {
    let accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    let what = format!("serviceaccount {}/{}", namespace, service_account);
    let sa = Poller::new(SERVICE_ACCOUNT_TIMEOUT)
        .until_present(&what, &accounts, service_account)
        .await?;

    let mut pull_secrets = sa.image_pull_secrets.unwrap_or_default();
    if pull_secrets.iter().any(|r| r.name == secret) {
        return Ok(());
    }
    pull_secrets.push(LocalObjectReference {
        name: secret.to_string(),
    });

    let patch = serde_json::json!({ "imagePullSecrets": pull_secrets });
    accounts
        .patch(service_account, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    info!(namespace = %namespace, service_account = %service_account, "Attached pull secret");
    Ok(())
}

/// Delete a namespace and wait until the API stops returning it
pub async fn delete_namespace(client: &Client, name: &str) -> Result<()> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    match namespaces.delete(name, &DeleteParams::default()).await {
        Ok(_) => info!(namespace = %name, "Deleting namespace"),
        Err(e) if is_not_found(&e) => {
            info!(namespace = %name, "Namespace already gone");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    Poller::new(NAMESPACE_DELETE_TIMEOUT)
        .until_absent(&format!("namespace {} removal", name), &namespaces, name)
        .await
}

/// Deployment has the expected number of available replicas
pub fn deployment_available(deployment: &Deployment, expected: i32) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
        == expected
}

/// Requested replica counts of zero mean one
pub fn effective_replicas(requested: i32) -> i32 {
    if requested > 0 {
        requested
    } else {
        1
    }
}

/// Wait until a Deployment has exactly `expected` available replicas
pub async fn wait_for_deployment_ready(
    client: &Client,
    cli: &KubeCli,
    namespace: &str,
    name: &str,
    expected: i32,
    timeout: Duration,
) -> Result<()> {
    let expected = effective_replicas(expected);
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let what = format!("deployment {}/{} ({} available)", namespace, name, expected);

    let result = Poller::new(timeout)
        .until(&what, move || {
            let deployments = deployments.clone();
            async move {
                Ok(deployments
                    .get_opt(name)
                    .await?
                    .is_some_and(|d| deployment_available(&d, expected)))
            }
        })
        .await;

    surface_with_diagnostics(cli, namespace, result).await
}

/// Wait for any Deployment matching a label selector to reach `expected`
pub async fn wait_for_labeled_deployment_ready(
    client: &Client,
    cli: &KubeCli,
    namespace: &str,
    selector: &str,
    expected: i32,
    timeout: Duration,
) -> Result<()> {
    let expected = effective_replicas(expected);
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let what = format!("deployment {}/[{}] ({} available)", namespace, selector, expected);

    let result = Poller::new(timeout)
        .until(&what, move || {
            let deployments = deployments.clone();
            async move {
                let list = deployments
                    .list(&ListParams::default().labels(selector))
                    .await?;
                Ok(list
                    .items
                    .first()
                    .is_some_and(|d| deployment_available(d, expected)))
            }
        })
        .await;

    surface_with_diagnostics(cli, namespace, result).await
}

/// Wait for a Deployment to disappear
pub async fn wait_for_deployment_removed(
    client: &Client,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<()> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    Poller::new(timeout)
        .until_absent(
            &format!("deployment {}/{} removal", namespace, name),
            &deployments,
            name,
        )
        .await
}

/// Wait for any namespaced object to disappear
pub async fn wait_for_object_deleted<K>(api: &Api<K>, kind: &str, name: &str) -> Result<()>
where
    K: Clone + DeserializeOwned + Debug,
{
    Poller::new(OBJECT_DELETE_TIMEOUT)
        .until_absent(&format!("{} {} removal", kind, name), api, name)
        .await
}

/// Delete an object if present and wait for it to be gone
pub async fn delete_and_wait<K>(api: &Api<K>, kind: &str, name: &str) -> Result<()>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {}
        Err(e) if is_not_found(&e) => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    wait_for_object_deleted(api, kind, name).await
}

/// Wait for the operator Deployment to have one available replica
pub async fn wait_for_operator_ready(client: &Client, cli: &KubeCli, namespace: &str) -> Result<()> {
    wait_for_deployment_ready(
        client,
        cli,
        namespace,
        OPERATOR_DEPLOYMENT_NAME,
        1,
        OPERATOR_READY_TIMEOUT,
    )
    .await?;
    info!(namespace = %namespace, "Operator deployment is ready");
    Ok(())
}

pub async fn wait_for_operator_removed(client: &Client, namespace: &str) -> Result<()> {
    wait_for_deployment_removed(
        client,
        namespace,
        OPERATOR_DEPLOYMENT_NAME,
        OPERATOR_REMOVED_TIMEOUT,
    )
    .await
}

/// Find the first Deployment whose name starts with `prefix`
pub async fn find_deployment_by_prefix(
    client: &Client,
    namespace: &str,
    prefix: &str,
) -> Result<Option<Deployment>> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let list = deployments.list(&ListParams::default()).await?;
    Ok(list.items.into_iter().find(|d| {
        d.metadata
            .name
            .as_deref()
            .is_some_and(|n| n.starts_with(prefix))
    }))
}

/// Dump namespace state before handing a timeout back to the caller
pub async fn surface_with_diagnostics(
    cli: &KubeCli,
    namespace: &str,
    result: Result<()>,
) -> Result<()> {
    if let Err(err @ Error::Timeout { .. }) = &result {
        warn!(namespace = %namespace, error = %err, "Dumping diagnostics after timeout");
        cli.dump_diagnostics(namespace).await;
    }
    result
}

/// Ingress routing a nip.io host to a service port
pub fn nip_io_ingress(namespace: &str, name: &str, host: &str, service: &str, port: i32) -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(port),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// True once the ingress controller published an address
pub fn ingress_has_address(ingress: &Ingress) -> bool {
    ingress
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .is_some_and(|addresses| !addresses.is_empty())
}

#[cfg(test)]
#[path = "k8s_test.rs"]
mod tests;
