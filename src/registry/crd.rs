use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ApicurioRegistry is the custom resource reconciled by the operator under test
///
/// Only the fields the harness sets or reads are modelled.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "apicur.io",
    version = "v1alpha1",
    kind = "ApicurioRegistry",
    plural = "apicurioregistries",
    namespaced,
    status = "ApicurioRegistryStatus"
)]
pub struct ApicurioRegistrySpec {
    #[serde(default)]
    pub configuration: Configuration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Storage backend: `sql`, `kafkasql` or `infinispan`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<SqlConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kafkasql: Option<KafkaSqlConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infinispan: Option<InfinispanConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SqlConfig {
    pub data_source: DataSource,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub url: String,
    pub user_name: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaSqlConfig {
    pub bootstrap_servers: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<KafkaSqlSecurity>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct KafkaSqlSecurity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<KafkaSqlTls>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scram: Option<KafkaSqlScram>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaSqlTls {
    pub truststore_secret_name: String,
    pub keystore_secret_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaSqlScram {
    pub truststore_secret_name: String,
    pub user: String,
    pub password_secret_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanism: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfinispanConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SecurityConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keycloak: Option<KeycloakSecurity>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakSecurity {
    pub url: String,
    pub realm: String,
    pub api_client_id: String,
    pub ui_client_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct DeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApicurioRegistryStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}
