//! Pending-replica slot of a ManagedSeedSet
//!
//! A replica is the Shoot, ManagedSeed and Seed sharing one name. At most one
//! replica is pending at a time; the slot keeps naming it until it becomes
//! ready, then moves on to the next replica that is not.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde_json::json;
use tracing::info;

use super::shoot_status::{status_label, ShootHealth};
use crate::clients::ClusterHandle;
use crate::crd::{
    is_condition_true, managed_seed_set_owner, LastOperationState, LastOperationType, ManagedSeed,
    ManagedSeedSet, PendingReplica, PendingReplicaReason, Seed, Shoot, CONDITION_SEED_REGISTERED,
};
use crate::Result;

/// Objects making up one replica, any of which may be missing
#[derive(Clone, Debug, Default)]
pub struct Replica {
    pub name: String,
    pub shoot: Option<Shoot>,
    pub managed_seed: Option<ManagedSeed>,
    pub seed: Option<Seed>,
}

/// Why the replica is not ready, or `None` if it is
pub fn replica_pending_reason(replica: &Replica) -> Option<PendingReplicaReason> {
    if let Some(shoot) = &replica.shoot {
        if shoot.metadata.deletion_timestamp.is_some() {
            return Some(if shoot.delete_failed() {
                PendingReplicaReason::ShootDeleteFailed
            } else {
                PendingReplicaReason::ShootDeleting
            });
        }
        match shoot.last_operation() {
            Some(op) if op.type_ != LastOperationType::Delete && op.state == LastOperationState::Failed => {
                return Some(PendingReplicaReason::ShootReconcileFailed);
            }
            _ if !shoot.is_settled() => return Some(PendingReplicaReason::ShootReconciling),
            _ => {}
        }
        if status_label(shoot) != Some(ShootHealth::Healthy) {
            return Some(PendingReplicaReason::ShootNotHealthy);
        }
    }

    match &replica.managed_seed {
        Some(ms) if ms.metadata.deletion_timestamp.is_some() => {
            return Some(PendingReplicaReason::ManagedSeedDeleting);
        }
        Some(ms) if !is_condition_true(ms.conditions(), CONDITION_SEED_REGISTERED) => {
            return Some(PendingReplicaReason::ManagedSeedPreparing);
        }
        None => return Some(PendingReplicaReason::ManagedSeedPreparing),
        _ => {}
    }

    match &replica.seed {
        Some(seed) if seed.is_ready() => None,
        _ => Some(PendingReplicaReason::SeedNotReady),
    }
}

/// Next value of the pending slot given the current slot and all replicas
pub fn next_pending_replica(
    current: Option<&PendingReplica>,
    replicas: &[Replica],
) -> Option<PendingReplica> {
    if let Some(current) = current {
        if let Some(replica) = replicas.iter().find(|r| r.name == current.name) {
            if let Some(reason) = replica_pending_reason(replica) {
                let since = if reason == current.reason {
                    current.since
                } else {
                    Utc::now()
                };
                return Some(PendingReplica {
                    name: current.name.clone(),
                    reason,
                    since,
                });
            }
        }
    }

    let mut candidates: Vec<&Replica> = replicas.iter().collect();
    candidates.sort_by(|a, b| a.name.cmp(&b.name));
    candidates.into_iter().find_map(|replica| {
        replica_pending_reason(replica).map(|reason| PendingReplica {
            name: replica.name.clone(),
            reason,
            since: Utc::now(),
        })
    })
}

/// Gather the replicas owned by `set`
pub async fn list_replicas(garden: &ClusterHandle, set: &ManagedSeedSet) -> Result<Vec<Replica>> {
    let namespace = set.namespace().unwrap_or_default();
    let set_name = set.name_any();
    let owned_by_set = |meta: &ObjectMeta| {
        managed_seed_set_owner(meta).is_some_and(|owner| owner.name == set_name)
    };

    let mut replicas: Vec<Replica> = garden
        .list::<ManagedSeed>(Some(&namespace), None)
        .await?
        .into_iter()
        .filter(|ms| owned_by_set(&ms.metadata))
        .map(|ms| Replica {
            name: ms.name_any(),
            managed_seed: Some(ms),
            ..Default::default()
        })
        .collect();

    for shoot in garden.list::<Shoot>(Some(&namespace), None).await? {
        if !owned_by_set(&shoot.metadata) {
            continue;
        }
        match replicas.iter_mut().find(|r| r.name == shoot.name_any()) {
            Some(replica) => replica.shoot = Some(shoot),
            None => replicas.push(Replica {
                name: shoot.name_any(),
                shoot: Some(shoot),
                ..Default::default()
            }),
        }
    }

    for replica in replicas.iter_mut() {
        replica.seed = garden.get::<Seed>(None, &replica.name).await?;
    }
    Ok(replicas)
}

/// Recompute and persist the status of a ManagedSeedSet
pub async fn reconcile_managed_seed_set(garden: &ClusterHandle, set: &ManagedSeedSet) -> Result<()> {
    let replicas = list_replicas(garden, set).await?;
    let ready = replicas
        .iter()
        .filter(|r| replica_pending_reason(r).is_none())
        .count();
    let pending = next_pending_replica(set.pending_replica(), &replicas);

    let status = set.status.clone().unwrap_or_default();
    let changed = status.pending_replica != pending
        || status.replicas != replicas.len() as i32
        || status.ready_replicas != ready as i32
        || status.observed_generation != set.metadata.generation;
    if !changed {
        return Ok(());
    }

    if let Some(pending) = &pending {
        info!(
            "ManagedSeedSet {} pending replica {} ({})",
            set.name_any(),
            pending.name,
            pending.reason
        );
    }

    let patch = json!({
        "status": {
            "observedGeneration": set.metadata.generation,
            "replicas": replicas.len(),
            "readyReplicas": ready,
            "pendingReplica": pending,
        }
    });
    garden
        .patch_status::<ManagedSeedSet>(set.namespace().as_deref(), &set.name_any(), &patch)
        .await?;
    Ok(())
}
