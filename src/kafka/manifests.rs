//! Strimzi custom resources, built as JSON documents
//!
//! They are piped to `kubectl apply` rather than created through
//! `kube::Api` because the Strimzi CRDs only exist once the broker operator
//! is installed.

use super::{KafkaAuth, KafkaClusterRequest};
use serde_json::{json, Value};

pub const STRIMZI_API_VERSION: &str = "kafka.strimzi.io/v1beta2";

pub const PLAIN_PORT: u16 = 9092;
pub const TLS_PORT: u16 = 9093;
pub const EXTERNAL_PORT: u16 = 9094;

/// Ingress host of the external bootstrap on non-OpenShift clusters
pub const BOOTSTRAP_HOST: &str = "bootstrap.127.0.0.1.nip.io";
pub const BROKER_HOST: &str = "broker-0.127.0.0.1.nip.io";

/// Minimum in-sync replicas for a replica count
pub fn min_isr(replicas: i32) -> i32 {
    if replicas > 1 {
        2
    } else {
        1
    }
}

fn listeners(req: &KafkaClusterRequest, is_openshift: bool) -> Vec<Value> {
    let mut listeners = vec![json!({
        "name": "plain",
        "port": PLAIN_PORT,
        "type": "internal",
        "tls": false,
    })];

    match req.auth {
        Some(auth) => listeners.push(json!({
            "name": "tls",
            "port": TLS_PORT,
            "type": "internal",
            "tls": true,
            "authentication": {"type": auth.strimzi_type()},
        })),
        None => listeners.push(json!({
            "name": "tls",
            "port": TLS_PORT,
            "type": "internal",
            "tls": true,
        })),
    }

    if req.external {
        let external = if is_openshift {
            json!({
                "name": "external",
                "port": EXTERNAL_PORT,
                "type": "route",
                "tls": true,
            })
        } else {
            json!({
                "name": "external",
                "port": EXTERNAL_PORT,
                "type": "ingress",
                "tls": true,
                "configuration": {
                    "class": "nginx",
                    "bootstrap": {"host": BOOTSTRAP_HOST},
                    "brokers": [{"broker": 0, "host": BROKER_HOST}],
                },
            })
        };
        listeners.push(external);
    }
    listeners
}

/// The `Kafka` cluster resource
pub fn kafka_cluster(req: &KafkaClusterRequest, is_openshift: bool) -> Value {
    let replicas = req.replicas.max(1);
    let isr = min_isr(replicas);

    json!({
        "apiVersion": STRIMZI_API_VERSION,
        "kind": "Kafka",
        "metadata": {
            "name": req.name,
            "namespace": req.namespace,
        },
        "spec": {
            "kafka": {
                "replicas": replicas,
                "listeners": listeners(req, is_openshift),
                "config": {
                    "offsets.topic.replication.factor": replicas,
                    "transaction.state.log.replication.factor": replicas,
                    "transaction.state.log.min.isr": isr,
                    "min.insync.replicas": isr,
                },
                "storage": {"type": "ephemeral"},
            },
            "zookeeper": {
                "replicas": replicas,
                "storage": {"type": "ephemeral"},
            },
            "entityOperator": {
                "topicOperator": {},
                "userOperator": {},
            },
        }
    })
}

pub fn kafka_topic(cluster: &str, namespace: &str, topic: &str, replicas: i32) -> Value {
    let replicas = replicas.max(1);
    json!({
        "apiVersion": STRIMZI_API_VERSION,
        "kind": "KafkaTopic",
        "metadata": {
            "name": topic,
            "namespace": namespace,
            "labels": {"strimzi.io/cluster": cluster},
        },
        "spec": {
            "partitions": replicas,
            "replicas": replicas,
            "config": {
                "retention.ms": 7_200_000,
                "segment.bytes": 1_073_741_824,
            },
        }
    })
}

pub fn kafka_user(cluster: &str, namespace: &str, user: &str, auth: KafkaAuth) -> Value {
    json!({
        "apiVersion": STRIMZI_API_VERSION,
        "kind": "KafkaUser",
        "metadata": {
            "name": user,
            "namespace": namespace,
            "labels": {"strimzi.io/cluster": cluster},
        },
        "spec": {
            "authentication": {"type": auth.strimzi_type()},
        }
    })
}

/// Point every `namespace:` line of a manifest at `namespace`
///
/// Mirrors the `sed s/namespace: .*/` rewrite broker bundles expect.
pub fn rewrite_namespace(manifest: &str, namespace: &str) -> String {
    manifest
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with("namespace:") {
                let indent = &line[..line.len() - trimmed.len()];
                format!("{}namespace: {}", indent, namespace)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
