//! ManagedSeedSet resource: parent of a group of ManagedSeed replicas

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::condition::Condition;

pub const MANAGED_SEED_SET_KIND: &str = "ManagedSeedSet";

/// ManagedSeedSet resource specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "seedmanagement.gardener.cloud",
    version = "v1alpha1",
    kind = "ManagedSeedSet",
    plural = "managedseedsets",
    singular = "managedseedset",
    shortname = "mss",
    namespaced,
    status = "ManagedSeedSetStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Replicas", "type": "integer", "jsonPath": ".spec.replicas"}"#,
    printcolumn = r#"{"name": "Ready", "type": "integer", "jsonPath": ".status.readyReplicas"}"#,
    printcolumn = r#"{"name": "Pending", "type": "string", "jsonPath": ".status.pendingReplica.name"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSeedSetSpec {
    /// Desired number of replicas
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Label selector of the replicas
    #[serde(default)]
    pub selector: LabelSelectorSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

/// ManagedSeedSet status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSeedSetStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Number of replicas owned by the set
    #[serde(default)]
    pub replicas: i32,

    /// Number of replicas whose shoot, ManagedSeed and seed are all ready
    #[serde(default)]
    pub ready_replicas: i32,

    /// The single replica currently being acted upon
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_replica: Option<PendingReplica>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PendingReplica {
    /// Name shared by the replica's Shoot, ManagedSeed and Seed
    pub name: String,
    pub reason: PendingReplicaReason,
    pub since: DateTime<Utc>,
}

/// Why a replica is pending
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum PendingReplicaReason {
    ShootReconciling,
    ShootDeleting,
    ShootReconcileFailed,
    ShootDeleteFailed,
    ShootNotHealthy,
    ManagedSeedPreparing,
    ManagedSeedDeleting,
    SeedNotReady,
}

impl fmt::Display for PendingReplicaReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PendingReplicaReason::ShootReconciling => "ShootReconciling",
            PendingReplicaReason::ShootDeleting => "ShootDeleting",
            PendingReplicaReason::ShootReconcileFailed => "ShootReconcileFailed",
            PendingReplicaReason::ShootDeleteFailed => "ShootDeleteFailed",
            PendingReplicaReason::ShootNotHealthy => "ShootNotHealthy",
            PendingReplicaReason::ManagedSeedPreparing => "ManagedSeedPreparing",
            PendingReplicaReason::ManagedSeedDeleting => "ManagedSeedDeleting",
            PendingReplicaReason::SeedNotReady => "SeedNotReady",
        };
        f.write_str(s)
    }
}

impl ManagedSeedSet {
    pub fn pending_replica(&self) -> Option<&PendingReplica> {
        self.status.as_ref().and_then(|s| s.pending_replica.as_ref())
    }
}

/// Controller owner reference of kind ManagedSeedSet, if any
pub fn managed_seed_set_owner(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|owner| owner.kind == MANAGED_SEED_SET_KIND && owner.controller == Some(true))
}
