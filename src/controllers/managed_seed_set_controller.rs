//! Controller maintaining the pending-replica slot of ManagedSeedSets
//!
//! Besides changes of the sets themselves, the controller is driven by events on
//! the replicas' Shoots, ManagedSeeds and Seeds that pass the pending-replica
//! gate in [`super::predicates`].

use futures::{future, stream, Stream, StreamExt};
use kube::{
    runtime::{
        controller::{Action, Controller},
        reflector::ObjectRef,
        watcher, WatchStreamExt,
    },
    Api, Client, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::predicates::{ReplicaEventFilter, WatchEvent, WatchEventTracker};
use super::Context;
use crate::crd::{ManagedSeed, ManagedSeedSet, Seed, Shoot};
use crate::metrics::prometheus::{RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS};
use crate::reconcilers::pending_replica::reconcile_managed_seed_set;
use crate::{Error, Result};

const CONTROLLER: &str = "ManagedSeedSet";

/// Run the ManagedSeedSet controller
pub async fn run(ctx: Arc<Context>, client: Client) {
    let namespace = ctx.config.garden_namespace.clone();
    let sets: Api<ManagedSeedSet> = Api::namespaced(client.clone(), &namespace);
    let filter = Arc::new(ReplicaEventFilter::new(ctx.garden().clone(), namespace.clone()));

    info!("Starting ManagedSeedSet controller in namespace {}", namespace);

    let shoot_requests = gated_requests(
        Api::<Shoot>::namespaced(client.clone(), &namespace),
        filter.clone(),
        |filter, event| async move { filter.shoot(&event).await },
    );
    let managed_seed_requests = gated_requests(
        Api::<ManagedSeed>::namespaced(client.clone(), &namespace),
        filter.clone(),
        |filter, event| async move { filter.managed_seed(&event).await },
    );
    let seed_requests = gated_requests(Api::<Seed>::all(client), filter, |filter, event| async move {
        filter.seed(&event).await
    });

    Controller::new(sets, watcher::Config::default())
        .reconcile_on(shoot_requests)
        .reconcile_on(managed_seed_requests)
        .reconcile_on(seed_requests)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => debug!("Reconciled {:?}", o),
                Err(e) => warn!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("ManagedSeedSet controller stopped");
}

/// Watch `api` and turn every event that passes `gate` into a set request
fn gated_requests<K, F, Fut>(
    api: Api<K>,
    filter: Arc<ReplicaEventFilter>,
    gate: F,
) -> impl Stream<Item = ObjectRef<ManagedSeedSet>> + Send + 'static
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    F: Fn(Arc<ReplicaEventFilter>, WatchEvent<K>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<ObjectRef<ManagedSeedSet>>>> + Send + 'static,
{
    watcher(api, watcher::Config::default())
        .default_backoff()
        .scan(WatchEventTracker::default(), |tracker, event| {
            let events = match event {
                Ok(event) => tracker.observe(event),
                Err(e) => {
                    warn!("Watch error: {}", e);
                    Vec::new()
                }
            };
            future::ready(Some(stream::iter(events)))
        })
        .flatten()
        .then(move |event| gate(filter.clone(), event))
        .filter_map(|request| {
            future::ready(match request {
                Ok(request) => request,
                Err(e) => {
                    warn!("Failed to map event onto ManagedSeedSet: {}", e);
                    None
                }
            })
        })
}

/// Reconcile a ManagedSeedSet resource
#[instrument(skip(set, ctx), fields(name = %set.name_any(), namespace = set.namespace().unwrap_or_default()))]
pub async fn reconcile(set: Arc<ManagedSeedSet>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    RECONCILIATIONS.with_label_values(&[CONTROLLER]).inc();

    let result = if set.metadata.deletion_timestamp.is_some() {
        Ok(())
    } else {
        reconcile_managed_seed_set(ctx.garden(), &set).await
    };

    RECONCILE_DURATION
        .with_label_values(&[CONTROLLER])
        .observe(start.elapsed().as_secs_f64());

    match result {
        Ok(()) => {
            ctx.backoff.reset(&key(&set));
            Ok(Action::requeue(ctx.config.controller.sync_period))
        }
        Err(e) => {
            RECONCILIATION_ERRORS
                .with_label_values(&[CONTROLLER, e.metric_label()])
                .inc();
            error!("Failed to reconcile ManagedSeedSet {}: {}", set.name_any(), e);
            Err(e)
        }
    }
}

/// Error policy for the controller
pub fn error_policy(set: Arc<ManagedSeedSet>, err: &Error, ctx: Arc<Context>) -> Action {
    Action::requeue(ctx.backoff.requeue_after(&key(&set), err))
}

fn key(set: &ManagedSeedSet) -> String {
    format!(
        "{}/{}/{}",
        CONTROLLER,
        set.namespace().unwrap_or_default(),
        set.name_any()
    )
}
