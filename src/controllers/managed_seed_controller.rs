//! Controller for ManagedSeed resources

use futures::StreamExt;
use kube::{
    runtime::{
        controller::{self, Action, Controller},
        reflector,
        reflector::{ObjectRef, Store},
        watcher, WatchStreamExt,
    },
    Api, Client, ResourceExt,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::finalizers::{ensure_finalizer, has_finalizer, remove_finalizer};
use super::jitter::{delayed, JitterPolicy};
use super::Context;
use crate::crd::{ManagedSeed, ManagedSeedStatus, Seed, Shoot, MANAGED_SEED_KIND};
use crate::metrics::prometheus::{
    MANAGED_SEED_OUTCOMES, RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS,
};
use crate::reconcilers::actuator::Outcome;
use crate::{Error, Result};

/// Finalizer held on ManagedSeeds until the seed is torn down
pub const FINALIZER: &str = "seedmanagement.gardener.cloud/managedseed";

const CONTROLLER: &str = "ManagedSeed";

/// Run the ManagedSeed controller
pub async fn run(ctx: Arc<Context>, client: Client) {
    let namespace = ctx.config.garden_namespace.clone();
    let managed_seeds: Api<ManagedSeed> = Api::namespaced(client.clone(), &namespace);
    let shoots: Api<Shoot> = Api::namespaced(client.clone(), &namespace);
    let seeds: Api<Seed> = Api::all(client);

    info!("Starting ManagedSeed controller in namespace {}", namespace);

    let (reader, writer) = reflector::store();
    let policy = JitterPolicy::new(&ctx.config.controller);
    let trigger = reflector(writer, watcher(managed_seeds, watcher::Config::default()))
        .default_backoff()
        .touched_objects();
    let trigger = delayed(trigger, move |managed_seed: &ManagedSeed| {
        policy.enqueue_delay(managed_seed)
    });

    let shoot_events = watcher(shoots, watcher::Config::default())
        .default_backoff()
        .touched_objects();
    let seed_events = watcher(seeds, watcher::Config::default())
        .default_backoff()
        .touched_objects();

    let store = reader.clone();
    let seed_namespace = namespace.clone();
    let config = controller::Config::default().concurrency(ctx.config.controller.concurrent_syncs);

    Controller::for_stream(trigger, reader)
        .with_config(config)
        .watches_stream(shoot_events, move |shoot| managed_seeds_for_shoot(&store, &shoot))
        .watches_stream(seed_events, move |seed| managed_seed_for_seed(&seed, &seed_namespace))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => debug!("Reconciled {:?}", o),
                Err(e) => warn!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("ManagedSeed controller stopped");
}

/// ManagedSeeds in the shoot's namespace that promote it
pub fn managed_seeds_for_shoot(store: &Store<ManagedSeed>, shoot: &Shoot) -> Vec<ObjectRef<ManagedSeed>> {
    let namespace = shoot.namespace();
    let name = shoot.name_any();
    store
        .state()
        .iter()
        .filter(|ms| ms.namespace() == namespace)
        .filter(|ms| ms.spec.shoot.as_ref().is_some_and(|s| s.name == name))
        .map(|ms| ObjectRef::from_obj(&**ms))
        .collect()
}

/// ManagedSeed controlling the seed, if any
pub fn managed_seed_for_seed(seed: &Seed, namespace: &str) -> Option<ObjectRef<ManagedSeed>> {
    seed.owner_references()
        .iter()
        .find(|owner| owner.kind == MANAGED_SEED_KIND && owner.controller == Some(true))
        .map(|owner| ObjectRef::new(&owner.name).within(namespace))
}

/// Reconcile a ManagedSeed resource
#[instrument(skip(managed_seed, ctx), fields(name = %managed_seed.name_any(), namespace = managed_seed.namespace().unwrap_or_default()))]
pub async fn reconcile(managed_seed: Arc<ManagedSeed>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let ns = managed_seed.namespace().unwrap_or_default();
    let name = managed_seed.name_any();

    RECONCILIATIONS.with_label_values(&[CONTROLLER]).inc();

    let result = if managed_seed.metadata.deletion_timestamp.is_some() {
        cleanup(&managed_seed, &ctx).await
    } else {
        apply(&managed_seed, &ctx).await
    };

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION
        .with_label_values(&[CONTROLLER])
        .observe(duration);

    match &result {
        Ok(_) => {
            ctx.backoff.reset(&key(&managed_seed));
            debug!("Reconciled ManagedSeed {}/{} in {:.2}s", ns, name, duration);
        }
        Err(e) => {
            RECONCILIATION_ERRORS
                .with_label_values(&[CONTROLLER, e.metric_label()])
                .inc();
            MANAGED_SEED_OUTCOMES.with_label_values(&["error"]).inc();
            error!("Failed to reconcile ManagedSeed {}/{}: {}", ns, name, e);
        }
    }

    result
}

async fn apply(managed_seed: &ManagedSeed, ctx: &Context) -> Result<Action> {
    if !responsible_for(managed_seed, ctx).await? {
        debug!(
            "Shoot of ManagedSeed {} is not scheduled onto this seed, skipping",
            managed_seed.name_any()
        );
        return Ok(Action::await_change());
    }

    ensure_finalizer(ctx.garden(), managed_seed, FINALIZER).await?;

    let outcome = ctx.actuator.reconcile(managed_seed, &ctx.cancel).await;
    update_status(ctx, managed_seed, &outcome.status).await?;
    let Outcome { wait, error, .. } = outcome;
    if let Some(error) = error {
        return Err(error);
    }

    let settings = &ctx.config.controller;
    if wait {
        MANAGED_SEED_OUTCOMES.with_label_values(&["waiting"]).inc();
        Ok(Action::requeue(settings.wait_sync_period))
    } else {
        MANAGED_SEED_OUTCOMES.with_label_values(&["reconciled"]).inc();
        Ok(Action::requeue(settings.sync_period))
    }
}

async fn cleanup(managed_seed: &ManagedSeed, ctx: &Context) -> Result<Action> {
    if !has_finalizer(managed_seed, FINALIZER) {
        return Ok(Action::await_change());
    }
    if !responsible_for(managed_seed, ctx).await? {
        return Ok(Action::await_change());
    }

    info!("Cleaning up ManagedSeed {}", key(managed_seed));
    let outcome = ctx.actuator.delete(managed_seed, &ctx.cancel).await;
    update_status(ctx, managed_seed, &outcome.status).await?;
    let Outcome {
        remove_finalizer: done,
        error,
        ..
    } = outcome;
    if let Some(error) = error {
        return Err(error);
    }

    if done {
        remove_finalizer(ctx.garden(), managed_seed, FINALIZER).await?;
        MANAGED_SEED_OUTCOMES.with_label_values(&["deleted"]).inc();
        return Ok(Action::await_change());
    }
    MANAGED_SEED_OUTCOMES.with_label_values(&["deleting"]).inc();
    Ok(Action::requeue(ctx.config.controller.wait_sync_period))
}

/// Whether this instance handles the ManagedSeed.
///
/// With `SEED_NAME` set only shoots scheduled onto that seed are handled. A
/// shoot that cannot be found is left to the actuator.
async fn responsible_for(managed_seed: &ManagedSeed, ctx: &Context) -> Result<bool> {
    let Some(seed_name) = ctx.config.seed_name.as_deref() else {
        return Ok(true);
    };
    let Some(shoot_name) = managed_seed.spec.shoot.as_ref().map(|s| s.name.as_str()) else {
        return Ok(true);
    };
    let shoot = ctx
        .garden()
        .get::<Shoot>(managed_seed.namespace().as_deref(), shoot_name)
        .await?;
    Ok(match shoot {
        Some(shoot) => shoot.spec.seed_name.as_deref() == Some(seed_name),
        None => true,
    })
}

/// Write the status if it differs from the stored one
async fn update_status(ctx: &Context, managed_seed: &ManagedSeed, status: &ManagedSeedStatus) -> Result<()> {
    if managed_seed.status.as_ref() == Some(status) {
        return Ok(());
    }
    let patch = json!({ "status": status });
    ctx.garden()
        .patch_status::<ManagedSeed>(managed_seed.namespace().as_deref(), &managed_seed.name_any(), &patch)
        .await?;
    Ok(())
}

/// Error policy for the controller
pub fn error_policy(managed_seed: Arc<ManagedSeed>, err: &Error, ctx: Arc<Context>) -> Action {
    let delay = ctx.backoff.requeue_after(&key(&managed_seed), err);
    warn!(
        "Reconciliation error for {}, retrying in {:?}: {}",
        key(&managed_seed),
        delay,
        err
    );
    Action::requeue(delay)
}

fn key(managed_seed: &ManagedSeed) -> String {
    format!(
        "{}/{}",
        managed_seed.namespace().unwrap_or_default(),
        managed_seed.name_any()
    )
}
