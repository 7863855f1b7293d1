//! Kubernetes Event recording for the ManagedSeed controllers.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate errors.

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta, Time};
use kube::{Resource, ResourceExt};
#[cfg(any(test, feature = "testing"))]
use std::sync::{Mutex, PoisonError};
use tracing::warn;

use crate::clients::ClusterHandle;

/// Severity of an event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// Publishes Kubernetes Events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Reference to `object` for use as an event's involved object
pub fn object_reference<K>(object: &K) -> ObjectReference
where
    K: Resource<DynamicType = ()>,
{
    ObjectReference {
        api_version: Some(K::api_version(&()).to_string()),
        kind: Some(K::kind(&()).to_string()),
        name: Some(object.name_any()),
        namespace: object.namespace(),
        uid: object.meta().uid.clone(),
        resource_version: object.meta().resource_version.clone(),
        ..Default::default()
    }
}

/// Writes `core/v1` Events into the garden cluster
pub struct KubeEventPublisher {
    client: ClusterHandle,
    controller_name: String,
}

impl KubeEventPublisher {
    pub fn new(client: ClusterHandle, controller_name: &str) -> Self {
        Self {
            client,
            controller_name: controller_name.to_string(),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let now = Utc::now();
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!(
                    "{}.",
                    resource_ref.name.clone().unwrap_or_default()
                )),
                namespace: Some(
                    resource_ref
                        .namespace
                        .clone()
                        .unwrap_or_else(|| "default".to_string()),
                ),
                ..Default::default()
            },
            involved_object: resource_ref.clone(),
            reason: Some(reason.to_string()),
            action: Some(action.to_string()),
            message: note,
            type_: Some(type_.as_str().to_string()),
            count: Some(1),
            first_timestamp: Some(Time(now)),
            last_timestamp: Some(Time(now)),
            event_time: Some(MicroTime(now)),
            reporting_component: Some(self.controller_name.clone()),
            reporting_instance: Some(self.controller_name.clone()),
            source: Some(EventSource {
                component: Some(self.controller_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };
        if let Err(e) = self.client.create(&event).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// One event captured by [`RecordingEventPublisher`]
#[cfg(any(test, feature = "testing"))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub type_: EventType,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

/// Keeps events in memory
#[cfg(any(test, feature = "testing"))]
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

#[cfg(any(test, feature = "testing"))]
impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedEvent {
                object: resource_ref.name.clone().unwrap_or_default(),
                type_,
                reason: reason.to_string(),
                action: action.to_string(),
                note,
            });
    }
}

/// Well-known event reason strings
pub mod reasons {
    pub const RECONCILING: &str = "Reconciling";
    pub const RECONCILED: &str = "Reconciled";
    pub const RECONCILE_ERROR: &str = "ReconcileError";
    pub const DELETING: &str = "Deleting";
    pub const DELETED: &str = "Deleted";
    pub const DELETE_ERROR: &str = "DeleteError";
}

/// Well-known event action strings
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const DELETE: &str = "Delete";
}
