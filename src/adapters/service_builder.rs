//! Kubernetes Service builder for the gardenlet metrics endpoint

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::deployment_builder::{build_labels, GARDENLET_NAME, METRICS_PORT};

/// Build the gardenlet Service
pub fn build_service(namespace: &str) -> Service {
    let labels = build_labels();

    Service {
        metadata: ObjectMeta {
            name: Some(GARDENLET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("metrics".to_string()),
                port: METRICS_PORT,
                target_port: Some(IntOrString::String("metrics".to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// In-cluster address of the gardenlet metrics endpoint
pub fn metrics_endpoint(namespace: &str) -> String {
    format!("{}.{}.svc.cluster.local:{}", GARDENLET_NAME, namespace, METRICS_PORT)
}
