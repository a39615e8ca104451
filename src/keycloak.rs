//! Keycloak auth server for the security scenarios
//!
//! The Keycloak operator is subscribed through OLM, then a single-instance
//! `Keycloak` CR and the `registry` realm are applied. The server is exposed
//! through a nip.io Ingress or an OpenShift Route so the probes can fetch
//! tokens from outside the cluster.

use crate::cmd::KubeCli;
use crate::config::LONG_POLL_INTERVAL;
use crate::error::{Error, Result};
use crate::k8s;
use crate::olm::{self, ObjectRef, SubscriptionRequest};
use crate::registry::{self, KeycloakSecurity};
use crate::suite::SuiteContext;
use crate::wait::Poller;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::core::DynamicObject;
use kube::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

pub const REALM: &str = "registry";
pub const API_CLIENT_ID: &str = "registry-client-api";
pub const UI_CLIENT_ID: &str = "registry-client-ui";
/// Password shared by every realm user
pub const USER_PASSWORD: &str = "changeme";
/// Realm users with the registry role they are granted
pub const USERS: [(&str, &str); 3] = [
    ("registry-admin", "sr-admin"),
    ("registry-developer", "sr-developer"),
    ("registry-user", "sr-readonly"),
];

const KEYCLOAK_NAME: &str = "example-keycloak";
const STATEFULSET_NAME: &str = "keycloak";
const SERVICE_NAME: &str = "keycloak-http";
const SERVICE_PORT: i32 = 8080;
const HOST: &str = "keycloak.127.0.0.1.nip.io";

const OPERATOR_DEPLOYMENT: &str = "keycloak-operator";
const SUBSCRIPTION_NAME: &str = "keycloak-operator";
const PACKAGE: &str = "keycloak-operator";
const CHANNEL: &str = "alpha";
const CSV: &str = "keycloak-operator.v12.0.3";

const OPERATOR_TIMEOUT: Duration = Duration::from_secs(120);
const SERVER_READY_TIMEOUT: Duration = Duration::from_secs(13 * 60);
const SERVER_REMOVED_TIMEOUT: Duration = Duration::from_secs(180);
const EXPOSURE_TIMEOUT: Duration = Duration::from_secs(90);

/// Catalog serving the Keycloak operator package
fn catalog_source(is_openshift: bool) -> (&'static str, &'static str) {
    if is_openshift {
        ("community-operators", "openshift-marketplace")
    } else {
        ("operatorhubio-catalog", "olm")
    }
}

/// A deployed Keycloak and what its removal needs
#[derive(Debug, Clone)]
pub struct KeycloakInfo {
    /// Externally reachable base URL, without the `/auth` context path
    pub url: String,
    pub namespace: String,
    pub realm: String,
    pub api_client_id: String,
    pub ui_client_id: String,
    pub subscription: ObjectRef,
    pub csv: String,
    /// `None` when the namespace already had an operator group
    pub operator_group: Option<ObjectRef>,
}

impl KeycloakInfo {
    pub fn new(url: &str, namespace: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            realm: REALM.to_string(),
            api_client_id: API_CLIENT_ID.to_string(),
            ui_client_id: UI_CLIENT_ID.to_string(),
            subscription: ObjectRef::new(SUBSCRIPTION_NAME, namespace),
            csv: CSV.to_string(),
            operator_group: None,
        }
    }

    pub fn auth_url(&self) -> String {
        format!("{}/auth", self.url)
    }

    pub fn token_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.auth_url(),
            self.realm
        )
    }

    /// Security block for registry CRs authenticating against this server
    pub fn registry_security(&self) -> KeycloakSecurity {
        KeycloakSecurity {
            url: self.auth_url(),
            realm: self.realm.clone(),
            api_client_id: self.api_client_id.clone(),
            ui_client_id: self.ui_client_id.clone(),
        }
    }
}

pub fn keycloak_server(namespace: &str) -> Value {
    json!({
        "apiVersion": "keycloak.org/v1alpha1",
        "kind": "Keycloak",
        "metadata": {
            "name": KEYCLOAK_NAME,
            "namespace": namespace,
            "labels": { "app": "sso" },
        },
        "spec": {
            "instances": 1,
            "externalAccess": { "enabled": false },
        },
    })
}

/// The `registry` realm with its two clients, roles and users
pub fn keycloak_realm(namespace: &str) -> Value {
    let users: Vec<Value> = USERS
        .iter()
        .map(|(user, role)| {
            json!({
                "username": user,
                "enabled": true,
                "credentials": [{ "type": "password", "value": USER_PASSWORD }],
                "realmRoles": [role],
            })
        })
        .collect();
    let roles: Vec<Value> = USERS.iter().map(|(_, role)| json!({ "name": role })).collect();

    json!({
        "apiVersion": "keycloak.org/v1alpha1",
        "kind": "KeycloakRealm",
        "metadata": {
            "name": REALM,
            "namespace": namespace,
            "labels": { "app": "sso" },
        },
        "spec": {
            "instanceSelector": { "matchLabels": { "app": "sso" } },
            "realm": {
                "id": REALM,
                "realm": REALM,
                "enabled": true,
                "displayName": "Registry",
                "roles": { "realm": roles },
                "clients": [
                    {
                        "clientId": API_CLIENT_ID,
                        "enabled": true,
                        "publicClient": true,
                        "directAccessGrantsEnabled": true,
                        "standardFlowEnabled": true,
                    },
                    {
                        "clientId": UI_CLIENT_ID,
                        "enabled": true,
                        "publicClient": true,
                        "redirectUris": ["*"],
                        "webOrigins": ["+"],
                        "standardFlowEnabled": true,
                    },
                ],
                "users": users,
            },
        },
    })
}

pub fn keycloak_service(namespace: &str) -> Service {
    let selector = BTreeMap::from([
        ("app".to_string(), "keycloak".to_string()),
        ("component".to_string(), "keycloak".to_string()),
    ]);
    Service {
        metadata: ObjectMeta {
            name: Some(SERVICE_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([("app".to_string(), "keycloak".to_string())])),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(SERVICE_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Subscribe to the operator, create the server and realm, expose it
pub async fn deploy_keycloak(suite: &SuiteContext, namespace: &str) -> Result<KeycloakInfo> {
    info!(namespace = %namespace, "Deploying keycloak");
    let client = &suite.client;
    let mut info = KeycloakInfo::new("", namespace);

    if !olm::any_operator_group_exists(client, namespace).await? {
        let group = format!("{}-operator-group", namespace);
        olm::create_operator_group(client, namespace, &group).await?;
        info.operator_group = Some(ObjectRef::new(group, namespace));
    }

    let (source, source_namespace) = catalog_source(suite.is_openshift);
    olm::create_subscription(
        client,
        &SubscriptionRequest {
            name: SUBSCRIPTION_NAME.to_string(),
            namespace: namespace.to_string(),
            package: PACKAGE.to_string(),
            catalog_source: source.to_string(),
            catalog_source_namespace: source_namespace.to_string(),
            channel: CHANNEL.to_string(),
            starting_csv: CSV.to_string(),
        },
    )
    .await?;
    k8s::wait_for_deployment_ready(client, &suite.cli, namespace, OPERATOR_DEPLOYMENT, 1, OPERATOR_TIMEOUT)
        .await?;

    suite.cli.apply_manifest(namespace, &[keycloak_server(namespace)]).await?;
    wait_for_server_ready(client, &suite.cli, namespace).await?;

    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    services
        .create(&PostParams::default(), &keycloak_service(namespace))
        .await?;
    info.url = expose(suite, namespace).await?;

    suite.cli.apply_manifest(namespace, &[keycloak_realm(namespace)]).await?;
    info!(url = %info.url, realm = %info.realm, "Keycloak is ready");
    Ok(info)
}

async fn wait_for_server_ready(client: &Client, cli: &KubeCli, namespace: &str) -> Result<()> {
    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let ready = Poller::new(SERVER_READY_TIMEOUT)
        .with_interval(LONG_POLL_INTERVAL)
        .until(&format!("statefulset {}/{}", namespace, STATEFULSET_NAME), || {
            let statefulsets = statefulsets.clone();
            async move {
                Ok(statefulsets
                    .get_opt(STATEFULSET_NAME)
                    .await?
                    .and_then(|s| s.status)
                    .and_then(|s| s.ready_replicas)
                    .is_some_and(|r| r > 0))
            }
        })
        .await;
    if ready.is_err() {
        cli.get_statefulsets(namespace).await.ok();
    }
    k8s::surface_with_diagnostics(cli, namespace, ready).await
}

/// Create the Ingress or Route and return the external base URL
async fn expose(suite: &SuiteContext, namespace: &str) -> Result<String> {
    let what = format!("keycloak exposure in {}", namespace);
    if suite.is_openshift {
        let routes: Api<DynamicObject> =
            Api::namespaced_with(suite.client.clone(), namespace, &k8s::route_resource());
        routes
            .create(
                &PostParams::default(),
                &k8s::service_route(namespace, SERVICE_NAME, SERVICE_NAME),
            )
            .await?;
        Poller::new(EXPOSURE_TIMEOUT)
            .until(&what, || {
                let routes = routes.clone();
                async move {
                    Ok(routes
                        .get_opt(SERVICE_NAME)
                        .await?
                        .is_some_and(|r| registry::route_host(&r).is_some()))
                }
            })
            .await?;
        let route = routes.get(SERVICE_NAME).await?;
        let host = registry::route_host(&route)
            .ok_or_else(|| Error::MissingField(format!("route {} ingress host", SERVICE_NAME)))?;
        return Ok(format!("http://{}", host));
    }

    let ingresses: Api<Ingress> = Api::namespaced(suite.client.clone(), namespace);
    ingresses
        .create(
            &PostParams::default(),
            &k8s::nip_io_ingress(namespace, SERVICE_NAME, HOST, SERVICE_NAME, SERVICE_PORT),
        )
        .await?;
    Poller::new(EXPOSURE_TIMEOUT)
        .until(&what, || {
            let ingresses = ingresses.clone();
            async move {
                Ok(ingresses
                    .get_opt(SERVICE_NAME)
                    .await?
                    .is_some_and(|i| k8s::ingress_has_address(&i)))
            }
        })
        .await?;
    Ok(format!("http://{}:{}", HOST, registry::EXTERNAL_PORT))
}

/// Tear down everything `deploy_keycloak` created, newest first
pub async fn remove_keycloak(suite: &SuiteContext, info: &KeycloakInfo) -> Result<()> {
    let namespace = info.namespace.as_str();
    let client = &suite.client;
    info!(namespace = %namespace, "Removing keycloak");

    suite.cli.delete_manifest(namespace, &[keycloak_realm(namespace)]).await?;
    suite.cli.delete_manifest(namespace, &[keycloak_server(namespace)]).await?;
    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    Poller::new(SERVER_REMOVED_TIMEOUT)
        .with_interval(LONG_POLL_INTERVAL)
        .until_absent(
            &format!("statefulset {}/{} removal", namespace, STATEFULSET_NAME),
            &statefulsets,
            STATEFULSET_NAME,
        )
        .await?;

    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    k8s::delete_and_wait(&services, "service", SERVICE_NAME).await?;
    if suite.is_openshift {
        let routes: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), namespace, &k8s::route_resource());
        k8s::delete_and_wait(&routes, "route", SERVICE_NAME).await?;
    } else {
        let ingresses: Api<Ingress> = Api::namespaced(client.clone(), namespace);
        k8s::delete_and_wait(&ingresses, "ingress", SERVICE_NAME).await?;
    }

    olm::delete_subscription(client, &info.subscription, Some(&info.csv), false).await?;
    if let Some(group) = &info.operator_group {
        olm::delete_operator_group(client, &group.namespace, &group.name).await?;
    }
    k8s::wait_for_deployment_removed(client, namespace, OPERATOR_DEPLOYMENT, OPERATOR_TIMEOUT).await
}

#[cfg(test)]
#[path = "keycloak_test.rs"]
mod tests;
