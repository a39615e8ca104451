//! Client trust/key stores for secured brokers
//!
//! The stores are produced by `scripts/kafka/create_cert_stores.sh`, which
//! reads the cluster CA (and for mutual TLS the user certificate) from
//! Strimzi's secrets and writes them back as PKCS12 store secrets.

use super::{KafkaAuth, KafkaClusterInfo};
use crate::cmd::{CliBinary, Cmd};
use crate::error::{Error, Result};
use crate::registry::{KafkaSqlScram, KafkaSqlSecurity, KafkaSqlTls};
use crate::suite::SuiteContext;
use std::path::Path;
use tracing::info;

/// Secrets created for one secured cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertStores {
    pub truststore_secret: String,
    /// Only for mutual TLS
    pub keystore_secret: Option<String>,
}

impl CertStores {
    pub fn for_cluster(auth: KafkaAuth, cluster: &str, user: &str) -> Self {
        Self {
            truststore_secret: format!("{}-cluster-ca-truststore", cluster),
            keystore_secret: match auth {
                KafkaAuth::Tls => Some(format!("{}-keystore", user)),
                KafkaAuth::Scram => None,
            },
        }
    }

    pub fn secret_names(&self) -> Vec<&str> {
        std::iter::once(self.truststore_secret.as_str())
            .chain(self.keystore_secret.as_deref())
            .collect()
    }
}

/// Environment handed to `create_cert_stores.sh`
pub fn cert_store_env(
    auth: KafkaAuth,
    cluster: &str,
    user: &str,
    namespace: &str,
    binary: CliBinary,
) -> Vec<(String, String)> {
    let stores = CertStores::for_cluster(auth, cluster, user);
    let mut env = vec![(
        "CLUSTER_CA_CERT_SECRET".to_string(),
        format!("{}-cluster-ca-cert", cluster),
    )];
    if let (KafkaAuth::Tls, Some(keystore)) = (auth, &stores.keystore_secret) {
        env.push(("CLIENT_CERT_SECRET".to_string(), user.to_string()));
        env.push(("TRUSTSTORE_SECRET".to_string(), stores.truststore_secret.clone()));
        env.push(("KEYSTORE_SECRET".to_string(), keystore.clone()));
        env.push(("HOSTNAME".to_string(), format!("{}-kafka-bootstrap", cluster)));
    } else {
        env.push(("TRUSTSTORE_SECRET".to_string(), stores.truststore_secret.clone()));
    }
    env.push(("NAMESPACE".to_string(), namespace.to_string()));
    env.push(("K8S_CMD".to_string(), binary.as_str().to_string()));
    env
}

fn scripts_dir(suite: &SuiteContext) -> std::path::PathBuf {
    suite.config.suite_project_dir.join("scripts").join("kafka")
}

/// Run the store script for a secured cluster
pub async fn create_cert_stores(suite: &SuiteContext, cluster: &KafkaClusterInfo) -> Result<CertStores> {
    let (auth, user) = match (cluster.auth, cluster.user.as_deref()) {
        (Some(auth), Some(user)) => (auth, user),
        _ => {
            return Err(Error::MissingField(format!(
                "kafka cluster {} has no secured user",
                cluster.name
            )))
        }
    };

    info!(cluster = %cluster.name, auth = %auth, "Creating kafka cert stores");
    let script = scripts_dir(suite).join("create_cert_stores.sh");
    let env = cert_store_env(auth, &cluster.name, user, &cluster.namespace, suite.cli.binary());
    env.into_iter()
        .fold(Cmd::new(script.to_string_lossy()), |cmd, (k, v)| cmd.env(k, v))
        .run()
        .await?;

    Ok(CertStores::for_cluster(auth, &cluster.name, user))
}

/// Remove the local files the store script leaves behind
pub async fn clean_cert_files(suite_project_dir: &Path) -> Result<()> {
    let script = suite_project_dir
        .join("scripts")
        .join("kafka")
        .join("clean_certs.sh");
    Cmd::new(script.to_string_lossy()).run().await.map(|_| ())
}

/// CR security block pointing at the created stores
pub fn kafkasql_security(auth: KafkaAuth, user: &str, stores: &CertStores) -> KafkaSqlSecurity {
    match auth {
        KafkaAuth::Tls => KafkaSqlSecurity {
            tls: Some(KafkaSqlTls {
                truststore_secret_name: stores.truststore_secret.clone(),
                keystore_secret_name: stores.keystore_secret.clone().unwrap_or_default(),
            }),
            scram: None,
        },
        KafkaAuth::Scram => KafkaSqlSecurity {
            tls: None,
            scram: Some(KafkaSqlScram {
                truststore_secret_name: stores.truststore_secret.clone(),
                user: user.to_string(),
                password_secret_name: user.to_string(),
                mechanism: None,
            }),
        },
    }
}
