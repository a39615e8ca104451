//! OLM object kinds and builders
//!
//! OLM types are not part of k8s-openapi, so they are handled as
//! `DynamicObject`s with hand-written `ApiResource`s.

use crate::error::{Error, Result};
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use serde_json::{json, Value};

fn operators_resource(version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: "operators.coreos.com".to_string(),
        version: version.to_string(),
        api_version: format!("operators.coreos.com/{}", version),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

pub fn catalog_source_resource() -> ApiResource {
    operators_resource("v1alpha1", "CatalogSource", "catalogsources")
}

pub fn operator_group_resource() -> ApiResource {
    operators_resource("v1", "OperatorGroup", "operatorgroups")
}

pub fn subscription_resource() -> ApiResource {
    operators_resource("v1alpha1", "Subscription", "subscriptions")
}

pub fn csv_resource() -> ApiResource {
    operators_resource("v1alpha1", "ClusterServiceVersion", "clusterserviceversions")
}

pub fn package_manifest_resource() -> ApiResource {
    ApiResource {
        group: "packages.operators.coreos.com".to_string(),
        version: "v1".to_string(),
        api_version: "packages.operators.coreos.com/v1".to_string(),
        kind: "PackageManifest".to_string(),
        plural: "packagemanifests".to_string(),
    }
}

/// A gRPC catalog serving the operator bundle image
pub fn catalog_source(name: &str, namespace: &str, image: &str) -> DynamicObject {
    DynamicObject::new(name, &catalog_source_resource())
        .within(namespace)
        .data(json!({
            "spec": {
                "sourceType": "grpc",
                "image": image,
                "displayName": "Apicurio Registry Operator Catalog Source",
                "publisher": "apicurio-registry-qe",
            }
        }))
}

pub fn operator_group(name: &str, namespace: &str) -> DynamicObject {
    DynamicObject::new(name, &operator_group_resource())
        .within(namespace)
        .data(json!({
            "spec": {
                "targetNamespaces": [namespace],
            }
        }))
}

/// Everything needed to subscribe to one package channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub name: String,
    pub namespace: String,
    pub package: String,
    pub catalog_source: String,
    pub catalog_source_namespace: String,
    pub channel: String,
    pub starting_csv: String,
}

pub fn subscription(req: &SubscriptionRequest) -> DynamicObject {
    DynamicObject::new(&req.name, &subscription_resource())
        .within(&req.namespace)
        .data(json!({
            "spec": {
                "name": req.package,
                "source": req.catalog_source,
                "sourceNamespace": req.catalog_source_namespace,
                "startingCSV": req.starting_csv,
                "channel": req.channel,
                "installPlanApproval": "Automatic",
            }
        }))
}

fn field<'a>(obj: &'a DynamicObject, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(&obj.data, |value, key| value.get(key))
}

fn str_field<'a>(obj: &'a DynamicObject, path: &[&str]) -> Option<&'a str> {
    field(obj, path).and_then(Value::as_str)
}

/// `status.connectionState.lastObservedState` of a CatalogSource
pub fn catalog_connection_state(catalog: &DynamicObject) -> Option<&str> {
    str_field(catalog, &["status", "connectionState", "lastObservedState"])
}

/// `status.currentCSV` of a Subscription
pub fn subscription_current_csv(sub: &DynamicObject) -> Option<&str> {
    str_field(sub, &["status", "currentCSV"])
}

/// `spec.startingCSV` of a Subscription
pub fn subscription_starting_csv(sub: &DynamicObject) -> Option<&str> {
    str_field(sub, &["spec", "startingCSV"])
}

/// `status.phase` of a ClusterServiceVersion
pub fn csv_phase(csv: &DynamicObject) -> Option<&str> {
    str_field(csv, &["status", "phase"])
}

/// Pick the channel and CSV to subscribe to
///
/// Configured values win; otherwise the manifest's default channel and that
/// channel's current CSV are used. Both must end up non-empty.
pub fn resolve_channel(
    manifest: Option<&DynamicObject>,
    channel_override: Option<&str>,
    csv_override: Option<&str>,
) -> Result<(String, String)> {
    let channel = channel_override
        .map(str::to_string)
        .or_else(|| {
            manifest
                .and_then(|m| str_field(m, &["status", "defaultChannel"]))
                .map(str::to_string)
        })
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::MissingField("package manifest default channel".to_string()))?;

    let csv = csv_override
        .map(str::to_string)
        .or_else(|| {
            let channels = manifest.and_then(|m| field(m, &["status", "channels"]))?;
            channels
                .as_array()?
                .iter()
                .find(|c| c.get("name").and_then(Value::as_str) == Some(channel.as_str()))
                .and_then(|c| c.get("currentCSV"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::MissingField(format!("current CSV for channel {}", channel)))?;

    Ok((channel, csv))
}
