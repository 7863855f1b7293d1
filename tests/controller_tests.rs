//! Integration tests for the controller entry points
//!
//! These drive `reconcile` and `error_policy` the way the kube runtime would,
//! against in-memory clusters.

mod common;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::controller::Action;
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::watcher;
use kube::ResourceExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::*;
use managed_seed_operator::clients::memory::Verb;
use managed_seed_operator::clients::InMemoryCluster;
use managed_seed_operator::config::OperatorConfig;
use managed_seed_operator::controllers::managed_seed_controller::{
    self, managed_seed_for_seed, managed_seeds_for_shoot, FINALIZER,
};
use managed_seed_operator::controllers::{shoot_status_controller, Context};
use managed_seed_operator::crd::{
    is_condition_true, Condition, ManagedSeed, Seed, Shoot, CONDITION_SEED_REGISTERED,
    CONDITION_SHOOT_RECONCILED,
};
use managed_seed_operator::reconcilers::actuator::desired_seed;
use managed_seed_operator::reconcilers::shoot_status::SHOOT_STATUS_LABEL;
use managed_seed_operator::Error;

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    garden: Arc<InMemoryCluster>,
    shoot: Arc<InMemoryCluster>,
    ctx: Arc<Context>,
}

fn harness_with(config: OperatorConfig) -> Harness {
    let Landscape {
        garden,
        shoot,
        actuator,
        ..
    } = landscape();
    let ctx = Context::new(actuator, config, CancellationToken::new());
    Harness { garden, shoot, ctx }
}

fn harness() -> Harness {
    harness_with(OperatorConfig::default())
}

fn stored_managed_seed(harness: &Harness, managed_seed: &ManagedSeed) -> Arc<ManagedSeed> {
    harness.garden.insert(managed_seed);
    Arc::new(current(harness).expect("managed seed stored"))
}

fn current(harness: &Harness) -> Option<ManagedSeed> {
    harness
        .garden
        .object::<ManagedSeed>(Some(GARDEN_NS), MANAGED_SEED)
}

// ============================================================================
// ManagedSeed Controller Tests
// ============================================================================

#[tokio::test]
async fn reconcile_adds_finalizer_and_writes_status() {
    let harness = harness();
    harness.garden.insert(&settled_shoot());
    let managed_seed = stored_managed_seed(&harness, &template_managed_seed());

    let action = managed_seed_controller::reconcile(managed_seed, harness.ctx.clone())
        .await
        .expect("reconcile");

    assert_eq!(action, Action::requeue(Duration::from_secs(3600)));

    let updated = current(&harness).expect("managed seed");
    assert!(updated.finalizers().iter().any(|f| f == FINALIZER));
    let status = updated.status.expect("status written");
    assert_eq!(status.observed_generation, Some(1));
    assert!(is_condition_true(&status.conditions, CONDITION_SHOOT_RECONCILED));
    assert!(is_condition_true(&status.conditions, CONDITION_SEED_REGISTERED));

    let finalizer_patch = harness
        .garden
        .mutations()
        .into_iter()
        .find(|a| a.verb == Verb::Patch && a.kind == "ManagedSeed")
        .and_then(|a| a.body)
        .expect("finalizer patch");
    assert_eq!(finalizer_patch, json!({ "metadata": { "finalizers": [FINALIZER] } }));
}

#[tokio::test]
async fn unchanged_status_is_not_written_again() {
    let harness = harness();
    harness.garden.insert(&settled_shoot());
    let managed_seed = stored_managed_seed(&harness, &template_managed_seed());
    managed_seed_controller::reconcile(managed_seed, harness.ctx.clone())
        .await
        .expect("first reconcile");

    harness.garden.clear_actions();
    let again = Arc::new(current(&harness).expect("managed seed"));
    managed_seed_controller::reconcile(again, harness.ctx.clone())
        .await
        .expect("second reconcile");

    assert!(harness
        .garden
        .mutations()
        .iter()
        .all(|a| a.kind != "ManagedSeed"));
}

#[tokio::test]
async fn unsettled_shoot_requeues_with_wait_period() {
    let harness = harness();
    let mut shoot = settled_shoot();
    shoot.metadata.generation = Some(3);
    harness.garden.insert(&shoot);
    let managed_seed = stored_managed_seed(&harness, &template_managed_seed());

    let action = managed_seed_controller::reconcile(managed_seed, harness.ctx.clone())
        .await
        .expect("reconcile");

    assert_eq!(action, Action::requeue(Duration::from_secs(15)));
    let status = current(&harness).and_then(|ms| ms.status).expect("status");
    assert!(!is_condition_true(&status.conditions, CONDITION_SHOOT_RECONCILED));
}

#[tokio::test]
async fn actuator_error_is_returned_after_status_update() {
    let harness = harness();
    let managed_seed = stored_managed_seed(&harness, &template_managed_seed());

    let result = managed_seed_controller::reconcile(managed_seed, harness.ctx.clone()).await;

    assert!(matches!(result, Err(Error::NotFound { .. })));
    let status = current(&harness).and_then(|ms| ms.status).expect("status");
    assert!(!is_condition_true(&status.conditions, CONDITION_SHOOT_RECONCILED));
}

#[tokio::test]
async fn other_seeds_shoots_are_skipped() {
    let harness = harness_with(OperatorConfig {
        seed_name: Some("another-seed".to_string()),
        ..Default::default()
    });
    harness.garden.insert(&settled_shoot());
    let managed_seed = stored_managed_seed(&harness, &template_managed_seed());

    let action = managed_seed_controller::reconcile(managed_seed, harness.ctx.clone())
        .await
        .expect("reconcile");

    assert_eq!(action, Action::await_change());
    assert!(harness.garden.mutations().is_empty());
    assert!(current(&harness).is_some_and(|ms| ms.finalizers().is_empty()));
}

#[tokio::test]
async fn deletion_runs_until_finalizer_is_released() {
    let harness = harness();
    harness.garden.insert(&settled_shoot());
    let managed_seed = stored_managed_seed(&harness, &template_managed_seed());
    managed_seed_controller::reconcile(managed_seed, harness.ctx.clone())
        .await
        .expect("reconcile");
    assert!(harness.garden.contains::<Seed>(None, MANAGED_SEED));

    harness
        .garden
        .handle()
        .delete::<ManagedSeed>(Some(GARDEN_NS), MANAGED_SEED)
        .await
        .expect("delete");

    let mut actions = Vec::new();
    while let Some(managed_seed) = current(&harness) {
        assert!(actions.len() < 10, "deletion did not converge: {:?}", actions);
        let action = managed_seed_controller::reconcile(Arc::new(managed_seed), harness.ctx.clone())
            .await
            .expect("cleanup");
        actions.push(action);
    }

    assert_eq!(actions.last(), Some(&Action::await_change()));
    assert!(actions[..actions.len() - 1]
        .iter()
        .all(|a| *a == Action::requeue(Duration::from_secs(15))));
    assert!(!harness.garden.contains::<Seed>(None, MANAGED_SEED));
    assert!(harness.shoot.snapshot().is_empty());
}

#[tokio::test]
async fn deletion_without_finalizer_is_ignored() {
    let harness = harness();
    let mut managed_seed = template_managed_seed();
    managed_seed.metadata.deletion_timestamp = Some(Time(Utc::now()));

    let action = managed_seed_controller::reconcile(Arc::new(managed_seed), harness.ctx.clone())
        .await
        .expect("reconcile");

    assert_eq!(action, Action::await_change());
    assert!(harness.garden.mutations().is_empty());
}

#[tokio::test]
async fn error_policy_backs_off_per_object() {
    let harness = harness();
    let managed_seed = Arc::new(template_managed_seed());
    let transient = Error::KubeError("timeout".to_string());

    let first = managed_seed_controller::error_policy(managed_seed.clone(), &transient, harness.ctx.clone());
    let second = managed_seed_controller::error_policy(managed_seed.clone(), &transient, harness.ctx.clone());
    let invalid = managed_seed_controller::error_policy(
        managed_seed,
        &Error::ValidationError("bad spec".to_string()),
        harness.ctx.clone(),
    );

    assert_eq!(first, Action::requeue(Duration::from_secs(5)));
    assert_eq!(second, Action::requeue(Duration::from_secs(10)));
    assert_eq!(invalid, Action::requeue(Duration::from_secs(300)));
}

#[tokio::test]
async fn successful_reconcile_resets_backoff() {
    let harness = harness();
    harness.garden.insert(&settled_shoot());
    let managed_seed = stored_managed_seed(&harness, &template_managed_seed());
    let transient = Error::KubeError("timeout".to_string());
    managed_seed_controller::error_policy(managed_seed.clone(), &transient, harness.ctx.clone());
    assert_eq!(harness.ctx.backoff.failures("garden/ms-1"), 1);

    managed_seed_controller::reconcile(managed_seed, harness.ctx.clone())
        .await
        .expect("reconcile");

    assert_eq!(harness.ctx.backoff.failures("garden/ms-1"), 0);
}

// ============================================================================
// Watch Mapping Tests
// ============================================================================

#[test]
fn shoot_events_map_to_managed_seeds_referencing_it() {
    let (reader, mut writer) = reflector::store::<ManagedSeed>();
    let mut other = template_managed_seed();
    other.metadata.name = Some("ms-2".to_string());
    if let Some(shoot) = other.spec.shoot.as_mut() {
        shoot.name = "another-shoot".to_string();
    }
    writer.apply_watcher_event(&watcher::Event::Apply(template_managed_seed()));
    writer.apply_watcher_event(&watcher::Event::Apply(other));

    let requests = managed_seeds_for_shoot(&reader, &settled_shoot());

    assert_eq!(requests, vec![ObjectRef::new(MANAGED_SEED).within(GARDEN_NS)]);
}

#[test]
fn seed_events_map_to_controlling_managed_seed() {
    let managed_seed = template_managed_seed();
    let seed = desired_seed(&managed_seed, &seed_template());

    assert_eq!(
        managed_seed_for_seed(&seed, GARDEN_NS),
        Some(ObjectRef::new(MANAGED_SEED).within(GARDEN_NS))
    );

    let orphan = Seed::new("orphan", seed.spec.clone());
    assert_eq!(managed_seed_for_seed(&orphan, GARDEN_NS), None);
}

// ============================================================================
// Shoot Status Controller Tests
// ============================================================================

#[tokio::test]
async fn shoot_status_label_follows_health() {
    let harness = harness();
    let mut shoot = settled_shoot();
    if let Some(status) = shoot.status.as_mut() {
        status.conditions = vec![Condition::new("APIServerAvailable", "False", "Down", "apiserver down")];
    }
    harness.garden.insert(&shoot);
    let shoot = harness
        .garden
        .object::<Shoot>(Some(GARDEN_NS), SHOOT)
        .expect("shoot");

    let action = shoot_status_controller::reconcile(Arc::new(shoot), harness.ctx.clone())
        .await
        .expect("reconcile");

    assert_eq!(action, Action::requeue(Duration::from_secs(3600)));
    let updated = harness
        .garden
        .object::<Shoot>(Some(GARDEN_NS), SHOOT)
        .expect("shoot");
    assert_eq!(
        updated.labels().get(SHOOT_STATUS_LABEL).map(String::as_str),
        Some("unhealthy")
    );
    let patch = harness
        .garden
        .mutations()
        .into_iter()
        .find(|a| a.verb == Verb::Patch)
        .and_then(|a| a.body)
        .expect("label patch");
    assert_eq!(
        patch,
        json!({ "metadata": { "labels": { (SHOOT_STATUS_LABEL): "unhealthy" } } })
    );
}

#[tokio::test]
async fn matching_shoot_status_label_is_left_alone() {
    let harness = harness();
    let mut shoot = settled_shoot();
    shoot
        .labels_mut()
        .insert(SHOOT_STATUS_LABEL.to_string(), "healthy".to_string());
    harness.garden.insert(&shoot);

    shoot_status_controller::reconcile(Arc::new(shoot), harness.ctx.clone())
        .await
        .expect("reconcile");

    assert!(harness.garden.mutations().is_empty());
}
