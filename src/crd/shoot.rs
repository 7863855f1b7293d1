//! Shoot resource: the subset of an end-user cluster consumed by this operator

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::Condition;

/// Shoot resource specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "core.gardener.cloud",
    version = "v1beta1",
    kind = "Shoot",
    plural = "shoots",
    singular = "shoot",
    namespaced,
    status = "ShootStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Seed", "type": "string", "jsonPath": ".spec.seedName"}"#,
    printcolumn = r#"{"name": "Version", "type": "string", "jsonPath": ".spec.kubernetes.version"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".metadata.labels.shoot\\.gardener\\.cloud/status"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ShootSpec {
    /// Name of the SecretBinding that references the infrastructure credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_binding_name: Option<String>,

    /// Seed hosting the control plane of this shoot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_name: Option<String>,

    /// Region of the shoot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Kubernetes settings
    #[serde(default)]
    pub kubernetes: ShootKubernetes,

    /// DNS settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<ShootDns>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootKubernetes {
    /// Kubernetes version (semantic version, e.g. 1.30.2)
    #[serde(default)]
    pub version: String,

    /// kube-apiserver settings
    #[serde(rename = "kubeAPIServer", skip_serializing_if = "Option::is_none")]
    pub kube_api_server: Option<KubeApiServerConfig>,

    /// Vertical pod autoscaler inside the shoot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_pod_autoscaler: Option<ShootVerticalPodAutoscaler>,

    /// Whether a static token kubeconfig is generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_static_token_kubeconfig: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeApiServerConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admission_plugins: Vec<AdmissionPlugin>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionPlugin {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootVerticalPodAutoscaler {
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootDns {
    /// External domain of the shoot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Shoot status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootStatus {
    /// Generation last acted upon by the shoot reconciler
    #[serde(default)]
    pub observed_generation: i64,

    /// Last operation performed on the shoot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,

    /// Errors of the last operation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub last_errors: Vec<LastError>,

    /// Health conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Namespace of the shoot control plane in its seed
    #[serde(rename = "technicalID", skip_serializing_if = "Option::is_none")]
    pub technical_id: Option<String>,

    /// Credential state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<ShootCredentials>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    #[serde(rename = "type")]
    pub type_: LastOperationType,
    pub state: LastOperationState,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub progress: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum LastOperationType {
    Create,
    Reconcile,
    Delete,
    Migrate,
    Restore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum LastOperationState {
    Processing,
    Succeeded,
    Error,
    Failed,
    Pending,
    Aborted,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<String>,
    #[serde(rename = "taskID", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<ShootCredentialsRotation>,
}

/// Last rotation of each credential kind
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootCredentialsRotation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_authorities: Option<CredentialRotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<CredentialRotation>,
    #[serde(rename = "sshKeypair", skip_serializing_if = "Option::is_none")]
    pub ssh_keypair: Option<CredentialRotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<CredentialRotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_key: Option<CredentialRotation>,
    #[serde(rename = "etcdEncryptionKey", skip_serializing_if = "Option::is_none")]
    pub etcd_encryption_key: Option<CredentialRotation>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRotation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_initiation_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_completion_time: Option<DateTime<Utc>>,
}

impl Shoot {
    pub fn last_operation(&self) -> Option<&LastOperation> {
        self.status.as_ref().and_then(|s| s.last_operation.as_ref())
    }

    pub fn observed_generation(&self) -> i64 {
        self.status
            .as_ref()
            .map(|s| s.observed_generation)
            .unwrap_or_default()
    }

    /// The shoot reconciler has caught up with the latest spec and its last
    /// operation succeeded.
    pub fn is_settled(&self) -> bool {
        let generation_observed = self.metadata.generation.unwrap_or_default() == self.observed_generation();
        let succeeded = self
            .last_operation()
            .is_some_and(|op| op.state == LastOperationState::Succeeded);
        generation_observed && succeeded
    }

    pub fn last_operation_state_is(&self, state: LastOperationState) -> bool {
        self.last_operation().is_some_and(|op| op.state == state)
    }

    /// The last operation was a deletion that failed
    pub fn delete_failed(&self) -> bool {
        self.last_operation().is_some_and(|op| {
            op.type_ == LastOperationType::Delete && op.state == LastOperationState::Failed
        })
    }

    pub fn dns_domain(&self) -> Option<&str> {
        self.spec
            .dns
            .as_ref()
            .and_then(|dns| dns.domain.as_deref())
            .filter(|domain| !domain.is_empty())
    }

    pub fn technical_id(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.technical_id.as_deref())
    }
}
