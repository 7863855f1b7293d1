//! Gardenlet deployment overrides and component configuration

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::seed::{SecretReference, SeedSpec};

pub const GARDENLET_CONFIG_API_VERSION: &str = "gardenlet.config.gardener.cloud/v1alpha1";
pub const GARDENLET_CONFIG_KIND: &str = "GardenletConfiguration";

/// Deployment settings of the gardenlet
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GardenletDeployment {
    /// Number of gardenlet replicas
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_count: Option<i32>,

    /// Number of old ReplicaSets to retain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,

    /// Service account used by the gardenlet pods
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Image override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,

    /// Resource requirements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirementsSpec>,

    /// Pod labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_labels: BTreeMap<String, String>,

    /// Pod annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_annotations: BTreeMap<String, String>,

    /// Additional environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVarSpec>,

    /// Whether a VerticalPodAutoscaler is deployed for the gardenlet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpa: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
}

/// Resource requirements specification
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    /// Resource limits (cpu, memory)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,

    /// Resource requests (cpu, memory)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

/// Plain environment variable
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Component configuration of the gardenlet
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GardenletConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// How the gardenlet talks to the garden cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub garden_client_connection: Option<GardenClientConnection>,

    /// Client settings against the seed cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_client_connection: Option<ClientConnection>,

    /// Client settings against shoot clusters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shoot_client_connection: Option<ClientConnection>,

    /// Controller settings, passed through untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controllers: Option<serde_json::Value>,

    /// Feature gates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feature_gates: BTreeMap<String, bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,

    /// Seed the gardenlet registers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_config: Option<SeedTemplate>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GardenClientConnection {
    /// Raw kubeconfig for the garden cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,

    /// Secret in which the gardenlet stores its durable garden kubeconfig
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig_secret: Option<SecretReference>,

    /// Secret holding the bootstrap kubeconfig
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap_kubeconfig: Option<SecretReference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub qps: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst: Option<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientConnection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qps: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst: Option<i32>,
}

/// Template for a Seed object: metadata plus spec
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedTemplate {
    #[serde(default)]
    pub metadata: TemplateMetadata,
    pub spec: SeedSpec,
}

/// Object metadata carried by templates
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl GardenletDeployment {
    pub fn env_value(&self, name: &str) -> Option<&EnvVarSpec> {
        self.env.iter().find(|e| e.name == name)
    }
}
