//! ManagedSeed resource: request to promote a shoot into a seed

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::Condition;
use super::gardenlet::{GardenletConfiguration, GardenletDeployment, SeedTemplate};
use crate::{Error, Result};

pub const MANAGED_SEED_API_VERSION: &str = "seedmanagement.gardener.cloud/v1alpha1";
pub const MANAGED_SEED_KIND: &str = "ManagedSeed";

/// Annotation carrying a one-shot operation request
pub const ANNOTATION_OPERATION: &str = "gardener.cloud/operation";
/// Operation forcing the gardenlet to bootstrap again
pub const OPERATION_RENEW_KUBECONFIG: &str = "renew-kubeconfig";

/// Condition reporting whether the referenced shoot was reconciled
pub const CONDITION_SHOOT_RECONCILED: &str = "ShootReconciled";
/// Condition reporting whether the seed is registered
pub const CONDITION_SEED_REGISTERED: &str = "SeedRegistered";

/// ManagedSeed resource specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "seedmanagement.gardener.cloud",
    version = "v1alpha1",
    kind = "ManagedSeed",
    plural = "managedseeds",
    singular = "managedseed",
    shortname = "ms",
    namespaced,
    status = "ManagedSeedStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Shoot", "type": "string", "jsonPath": ".spec.shoot.name"}"#,
    printcolumn = r#"{"name": "Registered", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"SeedRegistered\")].status"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSeedSpec {
    /// Shoot (in the same namespace) that is promoted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shoot: Option<ShootReference>,

    /// Register the seed directly from this template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_template: Option<SeedTemplate>,

    /// Deploy a gardenlet into the shoot which registers the seed itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gardenlet: Option<Gardenlet>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootReference {
    pub name: String,
}

/// Gardenlet registration settings
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Gardenlet {
    /// Deployment overrides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<GardenletDeployment>,

    /// Component configuration overrides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<GardenletConfiguration>,

    /// How the gardenlet obtains its first garden credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<Bootstrap>,

    /// Merge deployment and configuration with the parent gardenlet's values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_with_parent: Option<bool>,
}

/// Bootstrap mechanism of the gardenlet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Bootstrap {
    #[default]
    BootstrapToken,
    ServiceAccount,
    None,
}

/// ManagedSeed status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSeedStatus {
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// How the seed of a ManagedSeed gets registered
#[derive(Clone, Copy, Debug)]
pub enum RegistrationMode<'a> {
    SeedTemplate(&'a SeedTemplate),
    Gardenlet(&'a Gardenlet),
}

impl Gardenlet {
    pub fn bootstrap(&self) -> Bootstrap {
        self.bootstrap.unwrap_or_default()
    }

    pub fn merge_with_parent(&self) -> bool {
        self.merge_with_parent.unwrap_or(true)
    }

    /// Seed template embedded in the gardenlet configuration
    pub fn seed_template(&self) -> Option<&SeedTemplate> {
        self.config.as_ref().and_then(|c| c.seed_config.as_ref())
    }
}

impl ManagedSeed {
    /// Name of the referenced shoot
    pub fn shoot_name(&self) -> Result<&str> {
        self.spec
            .shoot
            .as_ref()
            .map(|s| s.name.as_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::ValidationError("spec.shoot.name is required".to_string()))
    }

    /// Exactly one of seedTemplate or gardenlet must be set
    pub fn registration_mode(&self) -> Result<RegistrationMode<'_>> {
        match (&self.spec.seed_template, &self.spec.gardenlet) {
            (Some(template), None) => Ok(RegistrationMode::SeedTemplate(template)),
            (None, Some(gardenlet)) => Ok(RegistrationMode::Gardenlet(gardenlet)),
            (Some(_), Some(_)) => Err(Error::ValidationError(
                "only one of spec.seedTemplate or spec.gardenlet may be set".to_string(),
            )),
            (None, None) => Err(Error::ValidationError(
                "either spec.seedTemplate or spec.gardenlet must be set".to_string(),
            )),
        }
    }

    /// Seed template used by either registration mode
    pub fn seed_template(&self) -> Result<&SeedTemplate> {
        match self.registration_mode()? {
            RegistrationMode::SeedTemplate(template) => Ok(template),
            RegistrationMode::Gardenlet(gardenlet) => gardenlet.seed_template().ok_or_else(|| {
                Error::ValidationError(
                    "spec.gardenlet.config.seedConfig is required".to_string(),
                )
            }),
        }
    }

    pub fn operation(&self) -> Option<&str> {
        self.annotations().get(ANNOTATION_OPERATION).map(String::as_str)
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// Controller owner reference pointing at this ManagedSeed
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: MANAGED_SEED_API_VERSION.to_string(),
            kind: MANAGED_SEED_KIND.to_string(),
            name: self.name_any(),
            uid: self.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Whether `owner` is the controller reference of this ManagedSeed
    pub fn owns(&self, owner: &OwnerReference) -> bool {
        owner.kind == MANAGED_SEED_KIND
            && owner.name == self.name_any()
            && self
                .metadata
                .uid
                .as_ref()
                .map_or(true, |uid| uid == &owner.uid)
    }
}
