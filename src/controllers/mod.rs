//! Controllers watching the garden and driving the reconcilers

pub mod backoff;
pub mod finalizers;
pub mod jitter;
pub mod managed_seed_controller;
pub mod managed_seed_set_controller;
pub mod predicates;
pub mod shoot_status_controller;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::clients::{ClientRegistry, ClusterHandle};
use crate::config::OperatorConfig;
use crate::reconcilers::actuator::Actuator;
use backoff::ErrorBackoff;

/// Shared context for controllers
pub struct Context {
    pub actuator: Actuator,
    pub config: OperatorConfig,
    /// Cancelled on shutdown; in-flight reconciliations stop between steps
    pub cancel: CancellationToken,
    pub backoff: ErrorBackoff,
}

impl Context {
    /// Create a new context
    pub fn new(actuator: Actuator, config: OperatorConfig, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            actuator,
            config,
            cancel,
            backoff: ErrorBackoff::default(),
        })
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        self.actuator.registry()
    }

    pub fn garden(&self) -> &ClusterHandle {
        self.registry().garden()
    }
}
