//! Kubernetes Deployment builder for the in-shoot gardenlet

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use crate::crd::{GardenletDeployment, ResourceRequirementsSpec};

pub const GARDENLET_NAME: &str = "gardenlet";
pub const CONFIG_MAP_NAME: &str = "gardenlet-configmap";
pub const CONFIG_MOUNT_PATH: &str = "/etc/gardenlet/config";
pub const BOOTSTRAP_KUBECONFIG_MOUNT_PATH: &str = "/etc/gardenlet/kubeconfig-bootstrap";
pub const HEALTH_PORT: i32 = 2728;
pub const METRICS_PORT: i32 = 2729;

const DEFAULT_PULL_POLICY: &str = "IfNotPresent";

/// Build the gardenlet Deployment
pub fn build_deployment(
    namespace: &str,
    deployment: &GardenletDeployment,
    config_hash: &str,
    bootstrap_secret: Option<&str>,
) -> Deployment {
    let labels = build_labels();

    let mut pod_labels = labels.clone();
    pod_labels.extend(deployment.pod_labels.clone());

    let mut pod_annotations = deployment.pod_annotations.clone();
    pod_annotations.insert("checksum/configmap-gardenlet-config".to_string(), config_hash.to_string());

    Deployment {
        metadata: ObjectMeta {
            name: Some(GARDENLET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(deployment.replica_count.unwrap_or(1)),
            revision_history_limit: deployment.revision_history_limit,
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: Some(pod_annotations),
                    ..Default::default()
                }),
                spec: Some(build_pod_spec(deployment, bootstrap_secret)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_pod_spec(deployment: &GardenletDeployment, bootstrap_secret: Option<&str>) -> PodSpec {
    let image = deployment.image.clone().unwrap_or_default();
    let image_ref = match (&image.repository, &image.tag) {
        (Some(repository), Some(tag)) => format!("{}:{}", repository, tag),
        (Some(repository), None) => repository.clone(),
        _ => GARDENLET_NAME.to_string(),
    };

    let http_check = |path: &str, delay: i32| Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(HEALTH_PORT),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(delay),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        ..Default::default()
    };

    let mut volumes = vec![Volume {
        name: "gardenlet-config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: CONFIG_MAP_NAME.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut volume_mounts = vec![VolumeMount {
        name: "gardenlet-config".to_string(),
        mount_path: CONFIG_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    }];

    if let Some(secret) = bootstrap_secret {
        volumes.push(Volume {
            name: "gardenlet-kubeconfig-bootstrap".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        volume_mounts.push(VolumeMount {
            name: "gardenlet-kubeconfig-bootstrap".to_string(),
            mount_path: BOOTSTRAP_KUBECONFIG_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    let env: Vec<EnvVar> = deployment
        .env
        .iter()
        .map(|e| EnvVar {
            name: e.name.clone(),
            value: e.value.clone(),
            ..Default::default()
        })
        .collect();

    let container = Container {
        name: GARDENLET_NAME.to_string(),
        image: Some(image_ref),
        image_pull_policy: Some(
            image
                .pull_policy
                .unwrap_or_else(|| DEFAULT_PULL_POLICY.to_string()),
        ),
        args: Some(vec![format!("--config={}/config.yaml", CONFIG_MOUNT_PATH)]),
        ports: Some(vec![
            ContainerPort {
                name: Some("health".to_string()),
                container_port: HEALTH_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("metrics".to_string()),
                container_port: METRICS_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env: if env.is_empty() { None } else { Some(env) },
        resources: deployment.resources.as_ref().map(build_resources),
        volume_mounts: Some(volume_mounts),
        liveness_probe: Some(http_check("/healthz", 15)),
        readiness_probe: Some(http_check("/readyz", 10)),
        ..Default::default()
    };

    PodSpec {
        containers: vec![container],
        service_account_name: Some(
            deployment
                .service_account_name
                .clone()
                .unwrap_or_else(|| GARDENLET_NAME.to_string()),
        ),
        volumes: Some(volumes),
        ..Default::default()
    }
}

fn quantities(values: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if values.is_empty() {
        None
    } else {
        Some(
            values
                .iter()
                .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                .collect(),
        )
    }
}

fn build_resources(resources: &ResourceRequirementsSpec) -> ResourceRequirements {
    ResourceRequirements {
        limits: quantities(&resources.limits),
        requests: quantities(&resources.requests),
        ..Default::default()
    }
}

/// Labels shared by every gardenlet chart object
pub fn build_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "gardener".to_string()),
        ("role".to_string(), GARDENLET_NAME.to_string()),
    ])
}
