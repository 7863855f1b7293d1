//! Seed resource: the registration record of a cluster hosting shoot control planes

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::{is_condition_true, Condition};

/// Seed conditions that must all be True for a seed to count as ready
pub const SEED_READY_CONDITIONS: [&str; 4] = [
    "GardenletReady",
    "Bootstrapped",
    "SystemComponentsHealthy",
    "BackupBucketsReady",
];

/// Seed resource specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "core.gardener.cloud",
    version = "v1beta1",
    kind = "Seed",
    plural = "seeds",
    singular = "seed",
    status = "SeedStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Provider", "type": "string", "jsonPath": ".spec.provider.type"}"#,
    printcolumn = r#"{"name": "Region", "type": "string", "jsonPath": ".spec.provider.region"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SeedSpec {
    /// Infrastructure provider of the seed cluster
    #[serde(default)]
    pub provider: SeedProvider,

    /// Object store used for etcd backups of hosted control planes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<SeedBackup>,

    /// Secret holding the kubeconfig of the seed cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretReference>,

    /// DNS settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<SeedDns>,

    /// Network CIDRs of the seed cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub networks: Option<SeedNetworks>,

    /// Optional feature settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<SeedSettings>,

    /// Taints applied to the seed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<SeedTaint>,
}

/// Reference to a secret by name and namespace
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Secret name
    pub name: String,
    /// Secret namespace (defaults to the namespace of the referencing object)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SecretReference {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Namespace of the referenced secret, falling back to `default_namespace`
    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default_namespace)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedProvider {
    /// Provider type (aws, gcp, azure, ...)
    #[serde(rename = "type", default)]
    pub type_: String,
    /// Region of the seed cluster
    #[serde(default)]
    pub region: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedBackup {
    /// Provider of the backup object store
    pub provider: String,
    /// Region of the backup object store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Secret holding the credentials of the object store
    pub secret_ref: SecretReference,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedDns {
    /// Domain under which ingresses of the seed are exposed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_domain: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedNetworks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<String>,
    pub pods: String,
    pub services: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedSettings {
    /// Whether the seed runs its own vertical pod autoscaler
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_pod_autoscaler: Option<SeedSettingEnabled>,
    /// Whether the seed is visible to the scheduler
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<SeedSettingScheduling>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedSettingEnabled {
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedSettingScheduling {
    pub visible: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedTaint {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Seed status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedStatus {
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Expiration of the client certificate the gardenlet uses against the garden
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate_expiration_timestamp: Option<DateTime<Utc>>,

    /// Kubernetes version of the seed cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl SeedSpec {
    /// Vertical pod autoscaler is enabled unless explicitly switched off
    pub fn vertical_pod_autoscaler_enabled(&self) -> bool {
        self.settings
            .as_ref()
            .and_then(|s| s.vertical_pod_autoscaler.as_ref())
            .map(|v| v.enabled)
            .unwrap_or(true)
    }
}

impl Seed {
    /// The gardenlet's client certificate has expired (an expiry equal to `now` counts)
    pub fn client_certificate_expired(&self, now: DateTime<Utc>) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.client_certificate_expiration_timestamp)
            .is_some_and(|expiry| expiry <= now)
    }

    /// All readiness conditions report True
    pub fn is_ready(&self) -> bool {
        let conditions = self
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default();
        SEED_READY_CONDITIONS
            .iter()
            .all(|type_| is_condition_true(conditions, type_))
    }
}
