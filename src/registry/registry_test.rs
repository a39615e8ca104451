use super::*;
use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
use serde_json::json;

#[test]
fn test_names_and_hosts() {
    assert_eq!(registry_name("sql"), "apicurio-registry-sql");
    assert_eq!(nip_io_host("apicurio-registry-sql"), "apicurio-registry-sql.127.0.0.1.nip.io");
    assert_eq!(app_selector("dest-registry"), "app=dest-registry");
}

#[test]
fn test_registry_serializes_camel_case_and_skips_unset_fields() {
    // ARRANGE
    let configuration = Configuration {
        persistence: Some("sql".to_string()),
        log_level: Some("DEBUG".to_string()),
        sql: Some(SqlConfig {
            data_source: DataSource {
                url: "jdbc:postgresql://10.0.0.7:5432/apicurioregistry".to_string(),
                user_name: "apicuriouser".to_string(),
                password: "password".to_string(),
            },
        }),
        ..Default::default()
    };

    // ACT
    let cr = registry("apicurio-registry-sql", "apicurio-registry-e2e", configuration);
    let value = serde_json::to_value(&cr).expect("serialize");

    // ASSERT
    assert_eq!(value["apiVersion"], "apicur.io/v1alpha1");
    assert_eq!(value["kind"], "ApicurioRegistry");
    assert_eq!(value["metadata"]["namespace"], "apicurio-registry-e2e");
    assert_eq!(value["spec"]["configuration"]["logLevel"], "DEBUG");
    assert_eq!(
        value["spec"]["configuration"]["sql"]["dataSource"]["userName"],
        "apicuriouser"
    );
    assert!(value["spec"]["configuration"].get("kafkasql").is_none());
    assert!(value["spec"].get("deployment").is_none());
}

#[test]
fn test_kafkasql_security_fields() {
    let configuration = Configuration {
        persistence: Some("kafkasql".to_string()),
        kafkasql: Some(KafkaSqlConfig {
            bootstrap_servers: "registry-kafka-kafka-bootstrap.ns:9093".to_string(),
            security: Some(KafkaSqlSecurity {
                scram: Some(KafkaSqlScram {
                    truststore_secret_name: "registry-kafka-cluster-ca-truststore".to_string(),
                    user: "registry-user-secured".to_string(),
                    password_secret_name: "registry-user-secured".to_string(),
                    mechanism: None,
                }),
                tls: None,
            }),
        }),
        ..Default::default()
    };

    let value = serde_json::to_value(&configuration).expect("serialize");

    assert_eq!(
        value["kafkasql"]["bootstrapServers"],
        "registry-kafka-kafka-bootstrap.ns:9093"
    );
    assert_eq!(
        value["kafkasql"]["security"]["scram"]["passwordSecretName"],
        "registry-user-secured"
    );
    assert!(value["kafkasql"]["security"].get("tls").is_none());
}

#[test]
fn test_route_host_reads_first_ingress() {
    let route = DynamicObject::new("registry", &k8s::route_resource()).data(json!({
        "status": {"ingress": [{"host": "registry-ns.apps.example.com"}]}
    }));
    assert_eq!(route_host(&route), Some("registry-ns.apps.example.com"));

    let pending = DynamicObject::new("registry", &k8s::route_resource())
        .data(json!({"status": {"ingress": [{"host": ""}]}}));
    assert_eq!(route_host(&pending), None);

    let empty = DynamicObject::new("registry", &k8s::route_resource()).data(json!({}));
    assert_eq!(route_host(&empty), None);
}

#[test]
fn test_internal_endpoint_uses_service_dns_and_first_port() {
    let service = Service {
        metadata: ObjectMeta {
            name: Some("apicurio-registry-sql-service".to_string()),
            namespace: Some("apicurio-registry-e2e".to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![
                ServicePort {
                    port: 8080,
                    ..Default::default()
                },
                ServicePort {
                    port: 9090,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    };

    assert_eq!(
        internal_endpoint(&service),
        Some((
            "apicurio-registry-sql-service.apicurio-registry-e2e".to_string(),
            8080
        ))
    );
    assert_eq!(internal_endpoint(&Service::default()), None);
}
