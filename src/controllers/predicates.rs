//! Watch-event filters feeding the ManagedSeedSet controller
//!
//! Events on a replica's Shoot, ManagedSeed or Seed only reach the parent set
//! when the set's pending-replica slot names that replica and the event is the
//! one the slot's reason is waiting for. Siblings in one set are therefore
//! acted upon one at a time.

use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::clients::ClusterHandle;
use crate::crd::{
    is_condition_true, managed_seed_set_owner, LastOperationState, ManagedSeed, ManagedSeedSet,
    PendingReplicaReason, Seed, Shoot, CONDITION_SEED_REGISTERED,
};
use crate::reconcilers::shoot_status::{status_label, ShootHealth, SHOOT_STATUS_LABEL};
use crate::Result;

/// A watch event with the previous state of updated objects
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent<K> {
    Create(K),
    Update { old: K, new: K },
    Delete(K),
}

impl<K> WatchEvent<K> {
    /// The object as it is after the event
    pub fn object(&self) -> &K {
        match self {
            WatchEvent::Create(object) | WatchEvent::Delete(object) => object,
            WatchEvent::Update { new, .. } => new,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, WatchEvent::Delete(_))
    }
}

/// Turns raw watcher events into [`WatchEvent`]s by remembering the last seen
/// version of every object
#[derive(Debug)]
pub struct WatchEventTracker<K> {
    seen: HashMap<String, K>,
    relisted: Option<HashSet<String>>,
}

impl<K> Default for WatchEventTracker<K> {
    fn default() -> Self {
        Self {
            seen: HashMap::new(),
            relisted: None,
        }
    }
}

impl<K: Resource + Clone> WatchEventTracker<K> {
    pub fn observe(&mut self, event: watcher::Event<K>) -> Vec<WatchEvent<K>> {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(object) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(key_of(&object));
                }
                vec![self.apply(object)]
            }
            watcher::Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<String> = self
                    .seen
                    .keys()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|key| self.seen.remove(&key))
                    .map(WatchEvent::Delete)
                    .collect()
            }
            watcher::Event::Apply(object) => vec![self.apply(object)],
            watcher::Event::Delete(object) => {
                self.seen.remove(&key_of(&object));
                vec![WatchEvent::Delete(object)]
            }
        }
    }

    fn apply(&mut self, object: K) -> WatchEvent<K> {
        match self.seen.insert(key_of(&object), object.clone()) {
            Some(old) => WatchEvent::Update { old, new: object },
            None => WatchEvent::Create(object),
        }
    }
}

fn key_of<K: Resource>(object: &K) -> String {
    format!(
        "{}/{}",
        object.meta().namespace.as_deref().unwrap_or_default(),
        object.meta().name.as_deref().unwrap_or_default()
    )
}

/// Whether a Shoot event is what a slot with `reason` waits for
pub fn shoot_event_matches(reason: PendingReplicaReason, event: &WatchEvent<Shoot>) -> bool {
    let shoot = event.object();
    let deleting = shoot.metadata.deletion_timestamp.is_some();
    match reason {
        PendingReplicaReason::ShootReconciling => {
            deleting
                || shoot.last_operation_state_is(LastOperationState::Succeeded)
                || shoot.last_operation_state_is(LastOperationState::Failed)
        }
        PendingReplicaReason::ShootDeleting => deleting || shoot.delete_failed(),
        PendingReplicaReason::ShootNotHealthy => match event {
            WatchEvent::Update { old, new } => {
                status_label(old) != Some(ShootHealth::Healthy)
                    && status_label(new) == Some(ShootHealth::Healthy)
            }
            _ => status_label(shoot) == Some(ShootHealth::Healthy),
        },
        _ => false,
    }
}

/// Whether a ManagedSeed event is what a slot with `reason` waits for
pub fn managed_seed_event_matches(reason: PendingReplicaReason, event: &WatchEvent<ManagedSeed>) -> bool {
    let managed_seed = event.object();
    match reason {
        PendingReplicaReason::ManagedSeedPreparing => {
            managed_seed.metadata.deletion_timestamp.is_some()
                || is_condition_true(managed_seed.conditions(), CONDITION_SEED_REGISTERED)
        }
        PendingReplicaReason::ManagedSeedDeleting => event.is_delete(),
        _ => false,
    }
}

/// Whether a Seed event is what a slot with `reason` waits for
pub fn seed_event_matches(reason: PendingReplicaReason, event: &WatchEvent<Seed>) -> bool {
    reason == PendingReplicaReason::SeedNotReady && event.object().is_ready()
}

/// The shoot's status label changed between the two versions
pub fn shoot_status_label_changed(event: &WatchEvent<Shoot>) -> bool {
    match event {
        WatchEvent::Update { old, new } => {
            old.labels().get(SHOOT_STATUS_LABEL) != new.labels().get(SHOOT_STATUS_LABEL)
        }
        _ => false,
    }
}

/// Maps replica events onto their parent ManagedSeedSet, applying the
/// pending-replica gate
#[derive(Clone, Debug)]
pub struct ReplicaEventFilter {
    garden: ClusterHandle,
    garden_namespace: String,
}

impl ReplicaEventFilter {
    pub fn new(garden: ClusterHandle, garden_namespace: impl Into<String>) -> Self {
        Self {
            garden,
            garden_namespace: garden_namespace.into(),
        }
    }

    pub async fn shoot(&self, event: &WatchEvent<Shoot>) -> Result<Option<ObjectRef<ManagedSeedSet>>> {
        let shoot = event.object();
        let Some(owner) = managed_seed_set_owner(&shoot.metadata) else {
            return Ok(None);
        };
        let namespace = shoot.namespace().unwrap_or_default();
        let Some(set) = self
            .garden
            .get::<ManagedSeedSet>(Some(&namespace), &owner.name)
            .await?
        else {
            return Ok(None);
        };

        if shoot_status_label_changed(event) {
            debug!("Status label of shoot {}/{} changed", namespace, shoot.name_any());
            return Ok(Some(ObjectRef::from_obj(&set)));
        }
        Ok(gate(&set, &shoot.name_any(), |reason| shoot_event_matches(reason, event)))
    }

    pub async fn managed_seed(&self, event: &WatchEvent<ManagedSeed>) -> Result<Option<ObjectRef<ManagedSeedSet>>> {
        let managed_seed = event.object();
        let Some(set) = self.owning_set(managed_seed).await? else {
            return Ok(None);
        };
        Ok(gate(&set, &managed_seed.name_any(), |reason| {
            managed_seed_event_matches(reason, event)
        }))
    }

    pub async fn seed(&self, event: &WatchEvent<Seed>) -> Result<Option<ObjectRef<ManagedSeedSet>>> {
        let seed = event.object();
        let Some(managed_seed) = self
            .garden
            .get::<ManagedSeed>(Some(&self.garden_namespace), &seed.name_any())
            .await?
        else {
            return Ok(None);
        };
        let Some(set) = self.owning_set(&managed_seed).await? else {
            return Ok(None);
        };
        Ok(gate(&set, &seed.name_any(), |reason| seed_event_matches(reason, event)))
    }

    /// The existing ManagedSeedSet controlling `managed_seed`
    async fn owning_set(&self, managed_seed: &ManagedSeed) -> Result<Option<ManagedSeedSet>> {
        let Some(owner) = managed_seed_set_owner(&managed_seed.metadata) else {
            return Ok(None);
        };
        let namespace = managed_seed.namespace().unwrap_or_default();
        self.garden
            .get::<ManagedSeedSet>(Some(&namespace), &owner.name)
            .await
    }
}

/// Request for `set` iff its pending slot names `replica` and `matches` accepts
/// the slot's reason
fn gate<F>(set: &ManagedSeedSet, replica: &str, matches: F) -> Option<ObjectRef<ManagedSeedSet>>
where
    F: FnOnce(PendingReplicaReason) -> bool,
{
    let pending = set.pending_replica()?;
    if pending.name != replica || !matches(pending.reason) {
        return None;
    }
    Some(ObjectRef::from_obj(set))
}
