//! Gardenlet chart: defaults, rendering and application
//!
//! The chart directory holds `values.yaml` (parent gardenlet defaults under the
//! `gardenlet` key) and `images.yaml` (the image vector). Rendering turns chart
//! values into manifests, which are applied in order and deleted in reverse.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::Resource;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use super::deployment_builder::{build_deployment, build_labels, CONFIG_MAP_NAME, GARDENLET_NAME};
use super::gardenlet_values::ValuesHelper;
use super::image_vector::ImageVector;
use super::service_builder::{build_service, metrics_endpoint};
use crate::clients::{with_type_meta, ClusterHandle, ResourceType};
use crate::crd::{GardenletConfiguration, GardenletDeployment};
use crate::{Error, Result};

pub const VALUES_FILE: &str = "values.yaml";
pub const IMAGES_FILE: &str = "images.yaml";
pub const GARDENLET_CLUSTER_ROLE: &str = "gardener.cloud:system:gardenlet";

/// One rendered object
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    pub resource: ResourceType,
    pub namespace: Option<String>,
    pub name: String,
    pub body: Value,
}

impl Manifest {
    pub fn of<K>(object: &K) -> Result<Self>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let resource = ResourceType::of::<K>();
        let meta = object.meta();
        Ok(Self {
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone(),
            body: with_type_meta(&resource, serde_json::to_value(object)?),
            resource,
        })
    }
}

/// Applies and deletes a rendered chart in a cluster
#[async_trait]
pub trait ChartApplier: Send + Sync {
    async fn apply(&self, client: &ClusterHandle, namespace: &str, values: &Value) -> Result<()>;

    async fn delete(&self, client: &ClusterHandle, namespace: &str, values: &Value) -> Result<()>;
}

/// The bundled gardenlet chart
#[derive(Clone, Debug, Default)]
pub struct GardenletChart {
    defaults: Value,
    image_vector: ImageVector,
}

impl GardenletChart {
    pub fn new(defaults: Value, image_vector: ImageVector) -> Self {
        Self {
            defaults,
            image_vector,
        }
    }

    /// Load the chart from `path`, applying an optional image vector override
    pub fn load(path: &Path, image_vector_overwrite: Option<&Path>) -> Result<Self> {
        let values_path = path.join(VALUES_FILE);
        let defaults = if values_path.exists() {
            let raw = std::fs::read_to_string(&values_path).map_err(|e| {
                Error::ConfigError(format!("Failed to read {}: {}", values_path.display(), e))
            })?;
            serde_yaml::from_str(&raw)?
        } else {
            json!({})
        };

        let images_path = path.join(IMAGES_FILE);
        let mut image_vector = if images_path.exists() {
            ImageVector::read(&images_path)?
        } else {
            ImageVector::default()
        };
        if let Some(overwrite) = image_vector_overwrite {
            image_vector = image_vector.overwrite(ImageVector::read(overwrite)?);
        }

        info!(
            "Loaded gardenlet chart from {} ({} images)",
            path.display(),
            image_vector.images.len()
        );
        Ok(Self::new(defaults, image_vector))
    }

    /// Deployment defaults of the parent gardenlet
    pub fn parent_deployment(&self) -> Result<GardenletDeployment> {
        match self.defaults.get("gardenlet") {
            Some(values) => Ok(serde_json::from_value(values.clone())?),
            None => Ok(GardenletDeployment::default()),
        }
    }

    /// Configuration defaults of the parent gardenlet
    pub fn parent_config(&self) -> Result<GardenletConfiguration> {
        match self.defaults.get("gardenlet").and_then(|g| g.get("config")) {
            Some(config) => Ok(serde_json::from_value(config.clone())?),
            None => Ok(GardenletConfiguration::default()),
        }
    }

    /// Values helper seeded with this chart's defaults.
    ///
    /// `parent_config` replaces the chart's configuration defaults when given.
    pub fn values_helper(
        &self,
        garden_namespace: &str,
        parent_config: Option<GardenletConfiguration>,
    ) -> Result<ValuesHelper> {
        let parent_config = match parent_config {
            Some(config) => config,
            None => self.parent_config()?,
        };
        Ok(ValuesHelper::new(
            self.parent_deployment()?,
            parent_config,
            self.image_vector.clone(),
            garden_namespace,
        ))
    }

    /// Render the chart into manifests, in apply order
    pub fn render(&self, namespace: &str, values: &Value) -> Result<Vec<Manifest>> {
        let gardenlet = values
            .get("gardenlet")
            .ok_or_else(|| Error::ValidationError("chart values lack a gardenlet key".to_string()))?;
        let deployment: GardenletDeployment = serde_json::from_value(gardenlet.clone())?;
        let config = gardenlet.get("config").cloned().unwrap_or_else(|| json!({}));
        let config_yaml = serde_yaml::to_string(&config)?;
        let config_hash: String = Sha256::digest(config_yaml.as_bytes())
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();

        let labels = build_labels();
        let service_account_name = deployment
            .service_account_name
            .clone()
            .unwrap_or_else(|| GARDENLET_NAME.to_string());

        let mut manifests = vec![
            Manifest::of(&ServiceAccount {
                metadata: ObjectMeta {
                    name: Some(service_account_name.clone()),
                    namespace: Some(namespace.to_string()),
                    labels: Some(labels.clone()),
                    ..Default::default()
                },
                ..Default::default()
            })?,
            Manifest::of(&ClusterRoleBinding {
                metadata: ObjectMeta {
                    name: Some(GARDENLET_CLUSTER_ROLE.to_string()),
                    labels: Some(labels.clone()),
                    ..Default::default()
                },
                role_ref: RoleRef {
                    api_group: "rbac.authorization.k8s.io".to_string(),
                    kind: "ClusterRole".to_string(),
                    name: "cluster-admin".to_string(),
                },
                subjects: Some(vec![Subject {
                    kind: "ServiceAccount".to_string(),
                    name: service_account_name,
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                }]),
            })?,
        ];

        let bootstrap = gardenlet.get("bootstrapKubeconfig");
        let bootstrap_secret = bootstrap
            .and_then(|b| b.get("name"))
            .and_then(Value::as_str);
        if let (Some(name), Some(kubeconfig)) = (
            bootstrap_secret,
            bootstrap.and_then(|b| b.get("kubeconfig")).and_then(Value::as_str),
        ) {
            manifests.push(Manifest::of(&Secret {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    labels: Some(labels.clone()),
                    ..Default::default()
                },
                type_: Some("Opaque".to_string()),
                data: Some(BTreeMap::from([(
                    "kubeconfig".to_string(),
                    ByteString(kubeconfig.as_bytes().to_vec()),
                )])),
                ..Default::default()
            })?);
        }

        manifests.push(Manifest::of(&ConfigMap {
            metadata: ObjectMeta {
                name: Some(CONFIG_MAP_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("config.yaml".to_string(), config_yaml)])),
            ..Default::default()
        })?);
        manifests.push(Manifest::of(&build_service(namespace))?);
        manifests.push(Manifest::of(&build_deployment(
            namespace,
            &deployment,
            &config_hash,
            bootstrap_secret,
        ))?);

        if deployment.vpa.unwrap_or(false) {
            manifests.push(vertical_pod_autoscaler(namespace));
        }

        Ok(manifests)
    }
}

fn vertical_pod_autoscaler(namespace: &str) -> Manifest {
    let resource = ResourceType {
        group: "autoscaling.k8s.io".to_string(),
        version: "v1".to_string(),
        kind: "VerticalPodAutoscaler".to_string(),
        plural: "verticalpodautoscalers".to_string(),
    };
    let name = format!("{}-vpa", GARDENLET_NAME);
    let body = json!({
        "apiVersion": resource.api_version(),
        "kind": resource.kind,
        "metadata": { "name": name, "namespace": namespace, "labels": build_labels() },
        "spec": {
            "targetRef": { "apiVersion": "apps/v1", "kind": "Deployment", "name": GARDENLET_NAME },
            "updatePolicy": { "updateMode": "Auto" },
        },
    });
    Manifest {
        resource,
        namespace: Some(namespace.to_string()),
        name,
        body,
    }
}

#[async_trait]
impl ChartApplier for GardenletChart {
    async fn apply(&self, client: &ClusterHandle, namespace: &str, values: &Value) -> Result<()> {
        let manifests = self.render(namespace, values)?;
        for manifest in &manifests {
            debug!("Applying {} {}", manifest.resource.kind, manifest.name);
            client
                .create_or_update_raw(
                    &manifest.resource,
                    manifest.namespace.as_deref(),
                    &manifest.name,
                    manifest.body.clone(),
                )
                .await?;
        }
        info!(
            "Applied gardenlet chart ({} objects), metrics at {}",
            manifests.len(),
            metrics_endpoint(namespace)
        );
        Ok(())
    }

    async fn delete(&self, client: &ClusterHandle, namespace: &str, values: &Value) -> Result<()> {
        let manifests = self.render(namespace, values)?;
        for manifest in manifests.iter().rev() {
            debug!("Deleting {} {}", manifest.resource.kind, manifest.name);
            client
                .raw()
                .delete(&manifest.resource, manifest.namespace.as_deref(), &manifest.name)
                .await?;
        }
        info!("Deleted gardenlet chart from namespace {}", namespace);
        Ok(())
    }
}

/// Whether the gardenlet Deployment exists in `namespace`
pub async fn gardenlet_deployed(client: &ClusterHandle, namespace: &str) -> Result<bool> {
    client
        .exists::<Deployment>(Some(namespace), GARDENLET_NAME)
        .await
}
