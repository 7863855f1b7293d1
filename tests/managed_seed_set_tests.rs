//! Integration tests for the ManagedSeedSet pending-replica slot and the watch
//! filters that gate events onto it

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::ResourceExt;
use std::sync::Arc;

use common::*;
use managed_seed_operator::clients::memory::Verb;
use managed_seed_operator::clients::InMemoryCluster;
use managed_seed_operator::controllers::predicates::{
    managed_seed_event_matches, seed_event_matches, shoot_event_matches,
    shoot_status_label_changed, ReplicaEventFilter, WatchEvent, WatchEventTracker,
};
use managed_seed_operator::crd::{
    Condition, LastOperationState, LastOperationType, ManagedSeed, ManagedSeedSet,
    ManagedSeedSetSpec, ManagedSeedSetStatus, ManagedSeedStatus, PendingReplica,
    PendingReplicaReason, Seed, SeedSpec, SeedStatus, Shoot, CONDITION_SEED_REGISTERED,
    SEED_READY_CONDITIONS,
};
use managed_seed_operator::reconcilers::pending_replica::{
    next_pending_replica, reconcile_managed_seed_set, replica_pending_reason, Replica,
};
use managed_seed_operator::reconcilers::shoot_status::SHOOT_STATUS_LABEL;

// ============================================================================
// Test Helpers
// ============================================================================

const SET: &str = "seeds";

fn set_owner() -> OwnerReference {
    OwnerReference {
        api_version: "seedmanagement.gardener.cloud/v1alpha1".to_string(),
        kind: "ManagedSeedSet".to_string(),
        name: SET.to_string(),
        uid: "uid-set".to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn managed_seed_set(pending: Option<(&str, PendingReplicaReason)>) -> ManagedSeedSet {
    let mut set = ManagedSeedSet::new(
        SET,
        ManagedSeedSetSpec {
            replicas: Some(2),
            ..Default::default()
        },
    );
    set.metadata.namespace = Some(GARDEN_NS.to_string());
    set.metadata.generation = Some(1);
    set.status = pending.map(|(name, reason)| ManagedSeedSetStatus {
        pending_replica: Some(PendingReplica {
            name: name.to_string(),
            reason,
            since: Utc::now() - ChronoDuration::minutes(5),
        }),
        ..Default::default()
    });
    set
}

fn replica_shoot(name: &str, health: Option<&str>) -> Shoot {
    let mut shoot = settled_shoot();
    shoot.metadata.name = Some(name.to_string());
    shoot.metadata.owner_references = Some(vec![set_owner()]);
    if let Some(health) = health {
        shoot
            .labels_mut()
            .insert(SHOOT_STATUS_LABEL.to_string(), health.to_string());
    }
    shoot
}

fn replica_managed_seed(name: &str, registered: bool) -> ManagedSeed {
    let mut managed_seed = template_managed_seed();
    managed_seed.metadata.name = Some(name.to_string());
    managed_seed.metadata.owner_references = Some(vec![set_owner()]);
    if registered {
        managed_seed.status = Some(ManagedSeedStatus {
            conditions: vec![Condition::new(
                CONDITION_SEED_REGISTERED,
                "True",
                "SeedRegistered",
                "Seed has been registered",
            )],
            observed_generation: Some(1),
        });
    }
    managed_seed
}

fn ready_seed(name: &str) -> Seed {
    let mut seed = Seed::new(name, SeedSpec::default());
    seed.status = Some(SeedStatus {
        conditions: SEED_READY_CONDITIONS
            .iter()
            .map(|type_| Condition::new(type_, "True", "Ready", ""))
            .collect(),
        ..Default::default()
    });
    seed
}

fn ready_replica(name: &str) -> Replica {
    Replica {
        name: name.to_string(),
        shoot: Some(replica_shoot(name, Some("healthy"))),
        managed_seed: Some(replica_managed_seed(name, true)),
        seed: Some(ready_seed(name)),
    }
}

fn deleting<K: kube::Resource>(mut object: K) -> K {
    object.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
    object
}

fn garden_with_set(pending: Option<(&str, PendingReplicaReason)>) -> (Arc<InMemoryCluster>, ReplicaEventFilter) {
    let garden = InMemoryCluster::new();
    garden.insert(&managed_seed_set(pending));
    let filter = ReplicaEventFilter::new(garden.handle(), GARDEN_NS);
    (garden, filter)
}

fn set_ref() -> ObjectRef<ManagedSeedSet> {
    ObjectRef::new(SET).within(GARDEN_NS)
}

// ============================================================================
// Watch Event Tracker Tests
// ============================================================================

#[test]
fn tracker_turns_watch_events_into_create_update_delete() {
    let mut tracker = WatchEventTracker::<Shoot>::default();
    let first = replica_shoot("seeds-0", None);
    let labelled = replica_shoot("seeds-0", Some("healthy"));

    assert!(tracker.observe(watcher::Event::Init).is_empty());
    assert_eq!(
        tracker.observe(watcher::Event::InitApply(first.clone())),
        vec![WatchEvent::Create(first.clone())]
    );
    assert!(tracker.observe(watcher::Event::InitDone).is_empty());

    assert_eq!(
        tracker.observe(watcher::Event::Apply(labelled.clone())),
        vec![WatchEvent::Update {
            old: first,
            new: labelled.clone()
        }]
    );
    assert_eq!(
        tracker.observe(watcher::Event::Delete(labelled.clone())),
        vec![WatchEvent::Delete(labelled)]
    );
}

#[test]
fn tracker_reports_objects_missing_from_a_relist_as_deleted() {
    let mut tracker = WatchEventTracker::<Shoot>::default();
    let gone = replica_shoot("seeds-0", None);
    let kept = replica_shoot("seeds-1", None);
    tracker.observe(watcher::Event::Apply(gone.clone()));
    tracker.observe(watcher::Event::Apply(kept.clone()));

    tracker.observe(watcher::Event::Init);
    let relisted = tracker.observe(watcher::Event::InitApply(kept.clone()));
    let done = tracker.observe(watcher::Event::InitDone);

    assert_eq!(
        relisted,
        vec![WatchEvent::Update {
            old: kept.clone(),
            new: kept
        }]
    );
    assert_eq!(done, vec![WatchEvent::Delete(gone)]);
}

// ============================================================================
// Event Predicate Tests
// ============================================================================

#[test]
fn shoot_not_healthy_slot_waits_for_transition_to_healthy() {
    let unhealthy = replica_shoot("seeds-0", Some("unhealthy"));
    let healthy = replica_shoot("seeds-0", Some("healthy"));
    let reason = PendingReplicaReason::ShootNotHealthy;

    assert!(shoot_event_matches(
        reason,
        &WatchEvent::Update {
            old: unhealthy.clone(),
            new: healthy.clone()
        }
    ));
    assert!(!shoot_event_matches(
        reason,
        &WatchEvent::Update {
            old: healthy.clone(),
            new: healthy.clone()
        }
    ));
    assert!(shoot_event_matches(reason, &WatchEvent::Create(healthy)));
    assert!(!shoot_event_matches(reason, &WatchEvent::Create(unhealthy)));
}

#[test]
fn shoot_reconciling_slot_waits_for_a_finished_operation() {
    let reason = PendingReplicaReason::ShootReconciling;
    let succeeded = replica_shoot("seeds-0", None);
    let mut processing = replica_shoot("seeds-0", None);
    if let Some(status) = processing.status.as_mut() {
        status.last_operation = Some(last_operation(LastOperationType::Reconcile, LastOperationState::Processing));
    }
    let mut failed = processing.clone();
    if let Some(status) = failed.status.as_mut() {
        status.last_operation = Some(last_operation(LastOperationType::Reconcile, LastOperationState::Failed));
    }

    assert!(shoot_event_matches(reason, &WatchEvent::Create(succeeded)));
    assert!(shoot_event_matches(reason, &WatchEvent::Create(failed)));
    assert!(!shoot_event_matches(reason, &WatchEvent::Create(processing.clone())));
    assert!(shoot_event_matches(reason, &WatchEvent::Create(deleting(processing))));
}

#[test]
fn shoot_deleting_slot_waits_for_deletion_or_failed_delete() {
    let reason = PendingReplicaReason::ShootDeleting;
    let mut delete_failed = replica_shoot("seeds-0", None);
    if let Some(status) = delete_failed.status.as_mut() {
        status.last_operation = Some(last_operation(LastOperationType::Delete, LastOperationState::Failed));
    }

    assert!(shoot_event_matches(reason, &WatchEvent::Create(delete_failed)));
    assert!(shoot_event_matches(
        reason,
        &WatchEvent::Create(deleting(replica_shoot("seeds-0", None)))
    ));
    assert!(!shoot_event_matches(
        reason,
        &WatchEvent::Create(replica_shoot("seeds-0", None))
    ));
    assert!(!shoot_event_matches(
        PendingReplicaReason::SeedNotReady,
        &WatchEvent::Create(replica_shoot("seeds-0", Some("healthy")))
    ));
}

#[test]
fn managed_seed_slots_wait_for_registration_or_removal() {
    let registered = replica_managed_seed("seeds-0", true);
    let preparing = replica_managed_seed("seeds-0", false);

    assert!(managed_seed_event_matches(
        PendingReplicaReason::ManagedSeedPreparing,
        &WatchEvent::Create(registered.clone())
    ));
    assert!(!managed_seed_event_matches(
        PendingReplicaReason::ManagedSeedPreparing,
        &WatchEvent::Create(preparing.clone())
    ));
    assert!(managed_seed_event_matches(
        PendingReplicaReason::ManagedSeedDeleting,
        &WatchEvent::Delete(preparing.clone())
    ));
    assert!(!managed_seed_event_matches(
        PendingReplicaReason::ManagedSeedDeleting,
        &WatchEvent::Update {
            old: preparing,
            new: deleting(registered)
        }
    ));
}

#[test]
fn seed_not_ready_slot_waits_for_ready_seed() {
    let ready = ready_seed("seeds-0");
    let not_ready = Seed::new("seeds-0", SeedSpec::default());

    assert!(seed_event_matches(
        PendingReplicaReason::SeedNotReady,
        &WatchEvent::Create(ready.clone())
    ));
    assert!(!seed_event_matches(
        PendingReplicaReason::SeedNotReady,
        &WatchEvent::Create(not_ready)
    ));
    assert!(!seed_event_matches(
        PendingReplicaReason::ShootReconciling,
        &WatchEvent::Create(ready)
    ));
}

#[test]
fn status_label_change_only_counts_on_update() {
    let unhealthy = replica_shoot("seeds-0", Some("unhealthy"));
    let healthy = replica_shoot("seeds-0", Some("healthy"));

    assert!(shoot_status_label_changed(&WatchEvent::Update {
        old: unhealthy,
        new: healthy.clone()
    }));
    assert!(!shoot_status_label_changed(&WatchEvent::Create(healthy)));
}

// ============================================================================
// Replica Event Filter Tests
// ============================================================================

#[tokio::test]
async fn shoot_event_of_pending_replica_reaches_set() {
    let (_garden, filter) = garden_with_set(Some(("seeds-0", PendingReplicaReason::ShootNotHealthy)));

    let request = filter
        .shoot(&WatchEvent::Create(replica_shoot("seeds-0", Some("healthy"))))
        .await
        .expect("filter");

    assert_eq!(request, Some(set_ref()));
}

#[tokio::test]
async fn shoot_event_of_sibling_is_dropped() {
    let (_garden, filter) = garden_with_set(Some(("seeds-0", PendingReplicaReason::ShootNotHealthy)));

    let request = filter
        .shoot(&WatchEvent::Create(replica_shoot("seeds-1", Some("healthy"))))
        .await
        .expect("filter");

    assert_eq!(request, None);
}

#[tokio::test]
async fn status_label_change_reaches_set_for_any_replica() {
    let (_garden, filter) = garden_with_set(Some(("seeds-0", PendingReplicaReason::SeedNotReady)));

    let request = filter
        .shoot(&WatchEvent::Update {
            old: replica_shoot("seeds-1", Some("healthy")),
            new: replica_shoot("seeds-1", Some("unhealthy")),
        })
        .await
        .expect("filter");

    assert_eq!(request, Some(set_ref()));
}

#[tokio::test]
async fn unowned_shoot_and_missing_set_are_dropped() {
    let (garden, filter) = garden_with_set(Some(("seeds-0", PendingReplicaReason::ShootNotHealthy)));

    let request = filter
        .shoot(&WatchEvent::Create(settled_shoot()))
        .await
        .expect("filter");
    assert_eq!(request, None);

    garden
        .handle()
        .delete::<ManagedSeedSet>(Some(GARDEN_NS), SET)
        .await
        .expect("delete set");
    let request = filter
        .shoot(&WatchEvent::Create(replica_shoot("seeds-0", Some("healthy"))))
        .await
        .expect("filter");
    assert_eq!(request, None);
}

#[tokio::test]
async fn managed_seed_deletion_of_pending_replica_reaches_set() {
    let (_garden, filter) = garden_with_set(Some(("seeds-0", PendingReplicaReason::ManagedSeedDeleting)));

    let request = filter
        .managed_seed(&WatchEvent::Delete(replica_managed_seed("seeds-0", true)))
        .await
        .expect("filter");

    assert_eq!(request, Some(set_ref()));
}

#[tokio::test]
async fn seed_event_is_traced_back_through_its_managed_seed() {
    let (garden, filter) = garden_with_set(Some(("seeds-0", PendingReplicaReason::SeedNotReady)));

    let request = filter
        .seed(&WatchEvent::Create(ready_seed("seeds-0")))
        .await
        .expect("filter");
    assert_eq!(request, None, "no ManagedSeed stored yet");

    garden.insert(&replica_managed_seed("seeds-0", true));
    let request = filter
        .seed(&WatchEvent::Create(ready_seed("seeds-0")))
        .await
        .expect("filter");
    assert_eq!(request, Some(set_ref()));
}

// ============================================================================
// Pending Replica Tests
// ============================================================================

#[test]
fn pending_reason_follows_replica_lifecycle() {
    let mut replica = ready_replica("seeds-0");
    assert_eq!(replica_pending_reason(&replica), None);

    replica.seed = None;
    assert_eq!(
        replica_pending_reason(&replica),
        Some(PendingReplicaReason::SeedNotReady)
    );

    replica.managed_seed = Some(replica_managed_seed("seeds-0", false));
    assert_eq!(
        replica_pending_reason(&replica),
        Some(PendingReplicaReason::ManagedSeedPreparing)
    );

    replica.managed_seed = replica.managed_seed.take().map(deleting);
    assert_eq!(
        replica_pending_reason(&replica),
        Some(PendingReplicaReason::ManagedSeedDeleting)
    );

    replica.shoot = Some(replica_shoot("seeds-0", Some("unhealthy")));
    assert_eq!(
        replica_pending_reason(&replica),
        Some(PendingReplicaReason::ShootNotHealthy)
    );

    let mut failed = replica_shoot("seeds-0", None);
    if let Some(status) = failed.status.as_mut() {
        status.last_operation = Some(last_operation(LastOperationType::Reconcile, LastOperationState::Failed));
    }
    replica.shoot = Some(failed.clone());
    assert_eq!(
        replica_pending_reason(&replica),
        Some(PendingReplicaReason::ShootReconcileFailed)
    );

    let mut delete_failed = failed;
    if let Some(status) = delete_failed.status.as_mut() {
        status.last_operation = Some(last_operation(LastOperationType::Delete, LastOperationState::Failed));
    }
    replica.shoot = Some(deleting(delete_failed));
    assert_eq!(
        replica_pending_reason(&replica),
        Some(PendingReplicaReason::ShootDeleteFailed)
    );
}

#[test]
fn pending_slot_sticks_to_current_replica_until_ready() {
    let set = managed_seed_set(Some(("seeds-1", PendingReplicaReason::SeedNotReady)));
    let current = set.pending_replica().cloned().expect("pending");
    let mut unready = ready_replica("seeds-1");
    unready.seed = None;
    let replicas = vec![
        Replica {
            seed: None,
            ..ready_replica("seeds-0")
        },
        unready,
    ];

    let next = next_pending_replica(Some(&current), &replicas).expect("pending");

    assert_eq!(next.name, "seeds-1");
    assert_eq!(next.reason, PendingReplicaReason::SeedNotReady);
    assert_eq!(next.since, current.since);
}

#[test]
fn pending_slot_moves_to_first_unready_replica_by_name() {
    let current = PendingReplica {
        name: "seeds-0".to_string(),
        reason: PendingReplicaReason::SeedNotReady,
        since: Utc::now() - ChronoDuration::minutes(10),
    };
    let mut third = ready_replica("seeds-2");
    third.managed_seed = None;
    let mut second = ready_replica("seeds-1");
    second.seed = None;
    let replicas = vec![third, ready_replica("seeds-0"), second];

    let next = next_pending_replica(Some(&current), &replicas).expect("pending");
    assert_eq!(next.name, "seeds-1");
    assert_eq!(next.reason, PendingReplicaReason::SeedNotReady);

    let all_ready = vec![ready_replica("seeds-0"), ready_replica("seeds-1")];
    assert_eq!(next_pending_replica(Some(&current), &all_ready), None);
}

#[tokio::test]
async fn set_status_counts_replicas_and_names_pending_one() {
    let garden = InMemoryCluster::new();
    garden.insert(&managed_seed_set(None));
    garden.insert(&replica_shoot("seeds-0", Some("healthy")));
    garden.insert(&replica_managed_seed("seeds-0", true));
    garden.insert(&ready_seed("seeds-0"));
    let mut reconciling = replica_shoot("seeds-1", None);
    reconciling.metadata.generation = Some(2);
    garden.insert(&reconciling);
    garden.insert(&settled_shoot());

    let set = garden
        .object::<ManagedSeedSet>(Some(GARDEN_NS), SET)
        .expect("set");
    reconcile_managed_seed_set(&garden.handle(), &set)
        .await
        .expect("reconcile");

    let updated = garden
        .object::<ManagedSeedSet>(Some(GARDEN_NS), SET)
        .expect("set");
    let status = updated.status.clone().expect("status");
    assert_eq!(status.replicas, 2);
    assert_eq!(status.ready_replicas, 1);
    assert_eq!(status.observed_generation, Some(1));
    let pending = status.pending_replica.expect("pending replica");
    assert_eq!(pending.name, "seeds-1");
    assert_eq!(pending.reason, PendingReplicaReason::ShootReconciling);

    garden.clear_actions();
    reconcile_managed_seed_set(&garden.handle(), &updated)
        .await
        .expect("second reconcile");
    assert!(garden
        .mutations()
        .iter()
        .all(|action| action.verb != Verb::PatchStatus));
}
