//! Chart values of the in-shoot gardenlet
//!
//! The parent gardenlet's deployment and configuration are the defaults; the
//! ManagedSeed supplies overrides which are deep-merged on top unless
//! `mergeWithParent` is switched off.

use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::bootstrap::{
    GardenCredentials, GARDENLET_BOOTSTRAP_KUBECONFIG_SECRET, GARDENLET_KUBECONFIG_SECRET,
};
use super::image_vector::{ImageVector, GARDENLET_IMAGE};
use crate::crd::{
    EnvVarSpec, GardenClientConnection, GardenletConfiguration, GardenletDeployment, ManagedSeed,
    SecretReference, SeedTemplate, Shoot, TemplateMetadata, GARDENLET_CONFIG_API_VERSION,
    GARDENLET_CONFIG_KIND,
};
use crate::json::deep_merge;
use crate::Result;

/// Environment variable pointing the gardenlet at the shoot's API server
pub const KUBERNETES_SERVICE_HOST: &str = "KUBERNETES_SERVICE_HOST";

/// Merges parent and per-ManagedSeed gardenlet settings into chart values
#[derive(Clone, Debug, Default)]
pub struct ValuesHelper {
    parent_deployment: GardenletDeployment,
    parent_config: GardenletConfiguration,
    image_vector: ImageVector,
    garden_namespace: String,
}

fn merged<T>(parent: &T, overlay: Option<&T>) -> Result<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    let Some(overlay) = overlay else {
        return Ok(parent.clone());
    };
    let mut base = serde_json::to_value(parent)?;
    deep_merge(&mut base, &serde_json::to_value(overlay)?);
    Ok(serde_json::from_value(base)?)
}

impl ValuesHelper {
    pub fn new(
        parent_deployment: GardenletDeployment,
        parent_config: GardenletConfiguration,
        image_vector: ImageVector,
        garden_namespace: impl Into<String>,
    ) -> Self {
        Self {
            parent_deployment,
            parent_config,
            image_vector,
            garden_namespace: garden_namespace.into(),
        }
    }

    pub fn garden_namespace(&self) -> &str {
        &self.garden_namespace
    }

    /// Deployment of the gardenlet inside `shoot`
    pub fn merge_deployment(
        &self,
        overrides: Option<&GardenletDeployment>,
        merge_with_parent: bool,
        shoot: &Shoot,
    ) -> Result<GardenletDeployment> {
        let mut deployment = if merge_with_parent {
            merged(&self.parent_deployment, overrides)?
        } else {
            overrides.cloned().unwrap_or_default()
        };

        let image = deployment.image.get_or_insert_with(Default::default);
        if image.repository.is_none() {
            let resolved = self.image_vector.image(GARDENLET_IMAGE)?;
            image.repository = resolved.repository;
            if image.tag.is_none() {
                image.tag = resolved.tag;
            }
        }

        if let Some(domain) = shoot.dns_domain() {
            if deployment.env_value(KUBERNETES_SERVICE_HOST).is_none() {
                deployment.env.push(EnvVarSpec {
                    name: KUBERNETES_SERVICE_HOST.to_string(),
                    value: Some(format!("api.{}", domain)),
                });
            }
        }

        Ok(deployment)
    }

    /// Component configuration of the gardenlet.
    ///
    /// The parent's garden connection secrets and seed config never leak into
    /// the child.
    pub fn merge_configuration(
        &self,
        overrides: Option<&GardenletConfiguration>,
        merge_with_parent: bool,
    ) -> Result<GardenletConfiguration> {
        let mut config = if merge_with_parent {
            let mut parent = self.parent_config.clone();
            if let Some(connection) = parent.garden_client_connection.as_mut() {
                connection.kubeconfig = None;
                connection.kubeconfig_secret = None;
                connection.bootstrap_kubeconfig = None;
            }
            parent.seed_config = None;
            merged(&parent, overrides)?
        } else {
            overrides.cloned().unwrap_or_default()
        };

        config
            .api_version
            .get_or_insert_with(|| GARDENLET_CONFIG_API_VERSION.to_string());
        config
            .kind
            .get_or_insert_with(|| GARDENLET_CONFIG_KIND.to_string());
        Ok(config)
    }

    /// Values of the gardenlet chart: `{"gardenlet": {...}}`
    pub fn chart_values(
        &self,
        managed_seed: &ManagedSeed,
        template: &SeedTemplate,
        deployment: &GardenletDeployment,
        config: &GardenletConfiguration,
        credentials: &GardenCredentials,
    ) -> Result<Value> {
        let mut config = config.clone();
        let connection = config
            .garden_client_connection
            .get_or_insert_with(GardenClientConnection::default);

        match credentials {
            GardenCredentials::Bootstrap(_) => {
                connection.kubeconfig = Some(String::new());
                connection.kubeconfig_secret = Some(SecretReference::new(
                    GARDENLET_KUBECONFIG_SECRET,
                    &self.garden_namespace,
                ));
                connection.bootstrap_kubeconfig = Some(SecretReference::new(
                    GARDENLET_BOOTSTRAP_KUBECONFIG_SECRET,
                    &self.garden_namespace,
                ));
            }
            GardenCredentials::Kubeconfig(raw) => {
                connection.kubeconfig = Some(raw.clone());
                connection.kubeconfig_secret = None;
                connection.bootstrap_kubeconfig = None;
            }
        }

        config.seed_config = Some(SeedTemplate {
            metadata: TemplateMetadata {
                name: Some(managed_seed.name_any()),
                labels: template.metadata.labels.clone(),
                annotations: template.metadata.annotations.clone(),
            },
            spec: template.spec.clone(),
        });

        let mut values = serde_json::to_value(deployment)?;
        if !values.is_object() {
            values = json!({});
        }
        values["config"] = serde_json::to_value(&config)?;
        if let GardenCredentials::Bootstrap(Some(kubeconfig)) = credentials {
            values["bootstrapKubeconfig"] = json!({
                "name": GARDENLET_BOOTSTRAP_KUBECONFIG_SECRET,
                "namespace": self.garden_namespace,
                "kubeconfig": kubeconfig,
            });
        }

        Ok(json!({ "gardenlet": values }))
    }
}
