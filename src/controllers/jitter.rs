//! Enqueue jitter for ManagedSeeds
//!
//! When the garden API server is upgraded every gardenlet restarts at once and
//! every ManagedSeed shows up in the watch again. Spreading those enqueues over
//! a random delay keeps the controller from hitting all shoots together.

use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use rand::Rng;
use std::time::Duration;
use tracing::trace;

use crate::config::ControllerSettings;
use crate::crd::ManagedSeed;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JitterPolicy {
    pub sync_jitter_period: Duration,
    pub jitter_updates: bool,
}

impl JitterPolicy {
    pub fn new(settings: &ControllerSettings) -> Self {
        Self {
            sync_jitter_period: settings.sync_jitter_period,
            jitter_updates: settings.jitter_updates,
        }
    }

    /// Delay before `managed_seed` is handed to the controller
    pub fn enqueue_delay(&self, managed_seed: &ManagedSeed) -> Duration {
        self.enqueue_delay_with(managed_seed, &mut rand::thread_rng())
    }

    pub fn enqueue_delay_with<R: Rng>(&self, managed_seed: &ManagedSeed, rng: &mut R) -> Duration {
        let meta = &managed_seed.metadata;
        if meta.deletion_timestamp.is_some() || meta.generation == Some(1) {
            return Duration::ZERO;
        }

        let observed = managed_seed
            .status
            .as_ref()
            .and_then(|status| status.observed_generation);
        if meta.generation != observed && !self.jitter_updates {
            return Duration::ZERO;
        }

        if self.sync_jitter_period.is_zero() {
            return Duration::ZERO;
        }
        let millis = self.sync_jitter_period.as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(rng.gen_range(0..=millis))
    }
}

/// Re-emit the items of `input`, each successful one after `delay(item)`.
///
/// Items with a zero delay and errors pass through in order; delayed items
/// are held on their own timer so one long delay never blocks the rest.
pub fn delayed<S, K, E, F>(input: S, delay: F) -> impl Stream<Item = Result<K, E>> + Send + 'static
where
    S: Stream<Item = Result<K, E>> + Send + 'static,
    K: Send + 'static,
    E: Send + 'static,
    F: Fn(&K) -> Duration + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded();
    tokio::spawn(async move {
        let mut input = Box::pin(input);
        while let Some(item) = input.next().await {
            let wait = match &item {
                Ok(object) => delay(object),
                Err(_) => Duration::ZERO,
            };
            if wait.is_zero() {
                if tx.unbounded_send(item).is_err() {
                    break;
                }
                continue;
            }

            trace!("Delaying enqueue by {:?}", wait);
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                if tx.unbounded_send(item).is_err() {
                    trace!("Enqueue receiver dropped, discarding delayed event");
                }
            });
        }
    });
    rx
}
