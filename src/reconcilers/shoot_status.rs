//! Shoot health projected into the `shoot.gardener.cloud/status` label

use kube::ResourceExt;
use std::fmt;
use tracing::info;

use crate::clients::ClusterHandle;
use crate::crd::{
    Condition, LastOperationState, LastOperationType, Shoot, CONDITION_PROGRESSING, CONDITION_TRUE,
    CONDITION_UNKNOWN,
};
use crate::json::create_merge_patch;
use crate::metrics::prometheus::SHOOT_STATUS_UPDATES;
use crate::Result;

pub const SHOOT_STATUS_LABEL: &str = "shoot.gardener.cloud/status";

/// Health of a shoot, ordered by severity
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShootHealth {
    Healthy,
    Progressing,
    Unknown,
    Unhealthy,
}

impl ShootHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShootHealth::Healthy => "healthy",
            ShootHealth::Progressing => "progressing",
            ShootHealth::Unknown => "unknown",
            ShootHealth::Unhealthy => "unhealthy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "healthy" => Some(ShootHealth::Healthy),
            "progressing" => Some(ShootHealth::Progressing),
            "unknown" => Some(ShootHealth::Unknown),
            "unhealthy" => Some(ShootHealth::Unhealthy),
            _ => None,
        }
    }

    /// The more severe of the two
    pub fn or_worse(self, other: ShootHealth) -> ShootHealth {
        self.max(other)
    }

    fn from_bool(healthy: bool) -> ShootHealth {
        if healthy {
            ShootHealth::Healthy
        } else {
            ShootHealth::Unhealthy
        }
    }

    fn from_condition(condition: &Condition) -> ShootHealth {
        match condition.status.as_str() {
            CONDITION_TRUE => ShootHealth::Healthy,
            CONDITION_PROGRESSING => ShootHealth::Progressing,
            CONDITION_UNKNOWN => ShootHealth::Unknown,
            _ => ShootHealth::Unhealthy,
        }
    }
}

impl fmt::Display for ShootHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worst health over all conditions; no conditions means healthy
pub fn condition_health(conditions: &[Condition]) -> ShootHealth {
    conditions
        .iter()
        .map(ShootHealth::from_condition)
        .fold(ShootHealth::Healthy, ShootHealth::or_worse)
}

/// Health of a shoot from its last operation, last errors and conditions
pub fn compute_status(shoot: &Shoot) -> ShootHealth {
    let Some(status) = shoot.status.as_ref() else {
        return ShootHealth::Healthy;
    };
    let Some(last_operation) = status.last_operation.as_ref() else {
        return ShootHealth::Healthy;
    };
    let no_errors = status.last_errors.is_empty();

    if matches!(
        last_operation.type_,
        LastOperationType::Create | LastOperationType::Delete
    ) {
        return ShootHealth::from_bool(no_errors);
    }

    let health = condition_health(&status.conditions);
    if last_operation.state == LastOperationState::Processing {
        return health.or_worse(ShootHealth::from_bool(no_errors));
    }
    health.or_worse(ShootHealth::from_bool(
        last_operation.state == LastOperationState::Succeeded,
    ))
}

/// Current value of the status label
pub fn status_label(shoot: &Shoot) -> Option<ShootHealth> {
    shoot
        .labels()
        .get(SHOOT_STATUS_LABEL)
        .and_then(|v| ShootHealth::parse(v))
}

/// Patch the status label if the computed health differs from it.
///
/// Returns the new value when a patch was sent.
pub async fn update_status_label(garden: &ClusterHandle, shoot: &Shoot) -> Result<Option<ShootHealth>> {
    let health = compute_status(shoot);
    if shoot.labels().get(SHOOT_STATUS_LABEL).map(String::as_str) == Some(health.as_str()) {
        return Ok(None);
    }

    let mut updated = shoot.clone();
    updated
        .labels_mut()
        .insert(SHOOT_STATUS_LABEL.to_string(), health.as_str().to_string());
    let patch = create_merge_patch(&serde_json::to_value(shoot)?, &serde_json::to_value(&updated)?);
    garden
        .patch::<Shoot>(shoot.namespace().as_deref(), &shoot.name_any(), &patch)
        .await?;

    SHOOT_STATUS_UPDATES.with_label_values(&[health.as_str()]).inc();
    info!(
        "Shoot {}/{} status is now {}",
        shoot.namespace().unwrap_or_default(),
        shoot.name_any(),
        health
    );
    Ok(Some(health))
}
