//! Shared Selenium browser for the UI functional tests

use super::SuiteContext;
use crate::error::{Error, Result};
use crate::k8s;
use crate::registry;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, PodSpec, PodTemplateSpec, Probe, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::core::DynamicObject;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

pub const NAMESPACE: &str = "selenium";
pub const NAME: &str = "selenium-chrome";
const IMAGE: &str = "selenium/standalone-chrome";
const PORT: i32 = 4444;

const INGRESS_CONTROLLER_NAMESPACE: &str = "ingress-nginx";
const INGRESS_CONTROLLER: &str = "ingress-nginx-controller";
const INGRESS_CONTROLLER_TIMEOUT: Duration = Duration::from_secs(150);
const READY_TIMEOUT: Duration = Duration::from_secs(180);

/// Where the functional tests reach the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeleniumInfo {
    pub host: String,
    pub port: u16,
}

fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), NAME.to_string())])
}

fn metadata() -> ObjectMeta {
    ObjectMeta {
        name: Some(NAME.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        labels: Some(labels()),
        ..Default::default()
    }
}

pub fn selenium_deployment() -> Deployment {
    Deployment {
        metadata: metadata(),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: NAME.to_string(),
                        image: Some(IMAGE.to_string()),
                        ports: Some(vec![ContainerPort {
                            container_port: PORT,
                            name: Some("http".to_string()),
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        readiness_probe: Some(Probe {
                            http_get: Some(HTTPGetAction {
                                path: Some("/wd/hub".to_string()),
                                port: IntOrString::Int(PORT),
                                ..Default::default()
                            }),
                            initial_delay_seconds: Some(10),
                            period_seconds: Some(2),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn selenium_service() -> Service {
    Service {
        metadata: metadata(),
        spec: Some(ServiceSpec {
            selector: Some(labels()),
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Deploy the browser and expose it outside the cluster
pub async fn deploy_selenium(suite: &SuiteContext) -> Result<SeleniumInfo> {
    info!(namespace = %NAMESPACE, "Deploying selenium");
    let client = &suite.client;
    k8s::create_namespace(client, NAMESPACE, None).await?;

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), NAMESPACE);
    deployments.create(&PostParams::default(), &selenium_deployment()).await?;
    let services: Api<Service> = Api::namespaced(client.clone(), NAMESPACE);
    services.create(&PostParams::default(), &selenium_service()).await?;

    let routes: Api<DynamicObject> = Api::namespaced_with(client.clone(), NAMESPACE, &k8s::route_resource());
    if suite.is_openshift {
        routes
            .create(&PostParams::default(), &k8s::service_route(NAMESPACE, NAME, NAME))
            .await?;
    } else {
        k8s::wait_for_deployment_ready(
            client,
            &suite.cli,
            INGRESS_CONTROLLER_NAMESPACE,
            INGRESS_CONTROLLER,
            1,
            INGRESS_CONTROLLER_TIMEOUT,
        )
        .await?;
        let ingresses: Api<Ingress> = Api::namespaced(client.clone(), NAMESPACE);
        ingresses
            .create(
                &PostParams::default(),
                &k8s::nip_io_ingress(NAMESPACE, NAME, &registry::nip_io_host(NAME), NAME, PORT),
            )
            .await?;
    }

    k8s::wait_for_deployment_ready(client, &suite.cli, NAMESPACE, NAME, 1, READY_TIMEOUT).await?;

    let host = if suite.is_openshift {
        let route = routes.get(NAME).await?;
        registry::route_host(&route)
            .map(str::to_string)
            .ok_or_else(|| Error::MissingField(format!("route {} ingress host", NAME)))?
    } else {
        registry::nip_io_host(NAME)
    };
    info!(host = %host, "Selenium is ready");
    Ok(SeleniumInfo {
        host,
        port: registry::EXTERNAL_PORT,
    })
}

pub async fn remove_selenium(suite: &SuiteContext) -> Result<()> {
    info!(namespace = %NAMESPACE, "Removing selenium");
    let client = &suite.client;

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), NAMESPACE);
    k8s::delete_and_wait(&deployments, "deployment", NAME).await?;
    let services: Api<Service> = Api::namespaced(client.clone(), NAMESPACE);
    k8s::delete_and_wait(&services, "service", NAME).await?;
    if suite.is_openshift {
        let routes: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), NAMESPACE, &k8s::route_resource());
        k8s::delete_and_wait(&routes, "route", NAME).await?;
    } else {
        let ingresses: Api<Ingress> = Api::namespaced(client.clone(), NAMESPACE);
        k8s::delete_and_wait(&ingresses, "ingress", NAME).await?;
    }
    k8s::delete_namespace(client, NAMESPACE).await
}
