//! Controller keeping the shoot status label in line with shoot health

use chrono::Utc;
use futures::StreamExt;
use kube::{
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    Api, Client, ResourceExt,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::Context;
use crate::crd::Shoot;
use crate::metrics::prometheus::{RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS};
use crate::reconcilers::shoot_status::update_status_label;
use crate::reconcilers::warnings::get_warnings;
use crate::{Error, Result};

const CONTROLLER: &str = "ShootStatus";

/// Run the shoot status controller over shoots in all namespaces
pub async fn run(ctx: Arc<Context>, client: Client) {
    let shoots: Api<Shoot> = Api::all(client);

    info!("Starting shoot status controller");

    Controller::new(shoots, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => debug!("Reconciled {:?}", o),
                Err(e) => warn!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("Shoot status controller stopped");
}

/// Reconcile the status label of a shoot
#[instrument(skip(shoot, ctx), fields(name = %shoot.name_any(), namespace = shoot.namespace().unwrap_or_default()))]
pub async fn reconcile(shoot: Arc<Shoot>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    RECONCILIATIONS.with_label_values(&[CONTROLLER]).inc();

    let result = update_status_label(ctx.garden(), &shoot).await;

    RECONCILE_DURATION
        .with_label_values(&[CONTROLLER])
        .observe(start.elapsed().as_secs_f64());

    if let Err(e) = &result {
        RECONCILIATION_ERRORS
            .with_label_values(&[CONTROLLER, e.metric_label()])
            .inc();
        error!("Failed to update status label of shoot {}: {}", shoot.name_any(), e);
    }
    result?;

    for warning in get_warnings(&shoot, Utc::now(), ctx.config.credentials_rotation_interval) {
        debug!("Shoot {}: {}", shoot.name_any(), warning);
    }

    Ok(Action::requeue(ctx.config.controller.sync_period))
}

/// Error policy for the controller
pub fn error_policy(shoot: Arc<Shoot>, err: &Error, ctx: Arc<Context>) -> Action {
    let key = format!(
        "{}/{}/{}",
        CONTROLLER,
        shoot.namespace().unwrap_or_default(),
        shoot.name_any()
    );
    Action::requeue(ctx.backoff.requeue_after(&key, err))
}
