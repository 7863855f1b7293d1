//! In-memory [`ClusterClient`]
//!
//! Behaves like a single API server closely enough for reconciler tests:
//! creates conflict on existing names, merge patches follow RFC 7386, objects
//! carrying finalizers are only marked for deletion, and no-op patches keep the
//! resource version. Every call is recorded so tests can assert patch bodies.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{with_type_meta, ClusterClient, ClusterHandle, ResourceType};
use crate::json::apply_merge_patch;
use crate::{Error, Result};

/// API verb of a recorded call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Get,
    List,
    Create,
    Patch,
    PatchStatus,
    Delete,
}

/// One call made against the cluster
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedAction {
    pub verb: Verb,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub body: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    api_version: String,
    kind: String,
    namespace: String,
    name: String,
}

impl ObjectKey {
    fn new(resource: &ResourceType, namespace: Option<&str>, name: &str) -> Self {
        Self {
            api_version: resource.api_version(),
            kind: resource.kind.clone(),
            namespace: namespace.unwrap_or_default().to_string(),
            name: name.to_string(),
        }
    }
}

struct InjectedFailure {
    verb: Verb,
    kind: String,
    message: String,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    actions: Vec<RecordedAction>,
    failures: Vec<InjectedFailure>,
    counter: u64,
}

impl State {
    fn record(&mut self, verb: Verb, resource: &ResourceType, namespace: Option<&str>, name: &str, body: Option<Value>) {
        self.actions.push(RecordedAction {
            verb,
            kind: resource.kind.clone(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
            body,
        });
    }

    fn take_failure(&mut self, verb: Verb, kind: &str) -> Result<()> {
        match self
            .failures
            .iter()
            .position(|f| f.verb == verb && f.kind == kind)
        {
            Some(index) => {
                let failure = self.failures.remove(index);
                Err(Error::KubeError(failure.message))
            }
            None => Ok(()),
        }
    }

    fn next_version(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Store an updated object, dropping it when deletion is complete
    fn store(&mut self, key: ObjectKey, object: Value) {
        let deleting = !object["metadata"]["deletionTimestamp"].is_null();
        let has_finalizers = object["metadata"]["finalizers"]
            .as_array()
            .is_some_and(|f| !f.is_empty());
        if deleting && !has_finalizers {
            self.objects.remove(&key);
        } else {
            self.objects.insert(key, object);
        }
    }
}

/// Cluster state held in memory
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn handle(self: &Arc<Self>) -> ClusterHandle {
        ClusterHandle::new(self.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object without recording an action
    pub fn insert<K>(&self, object: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let resource = ResourceType::of::<K>();
        let meta = object.meta();
        let key = ObjectKey::new(
            &resource,
            meta.namespace.as_deref(),
            meta.name.as_deref().unwrap_or_default(),
        );
        let Ok(value) = serde_json::to_value(object) else {
            return;
        };
        let mut value = with_type_meta(&resource, value);
        let mut state = self.lock();
        let version = state.next_version();
        if value["metadata"]["uid"].is_null() {
            value["metadata"]["uid"] = json!(format!("uid-{}", version));
        }
        value["metadata"]["resourceVersion"] = json!(version.to_string());
        state.objects.insert(key, value);
    }

    /// Read an object without recording an action
    pub fn object<K>(&self, namespace: Option<&str>, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let key = ObjectKey::new(&ResourceType::of::<K>(), namespace, name);
        let value = self.lock().objects.get(&key).cloned()?;
        serde_json::from_value(value).ok()
    }

    pub fn contains<K>(&self, namespace: Option<&str>, name: &str) -> bool
    where
        K: Resource<DynamicType = ()>,
    {
        let key = ObjectKey::new(&ResourceType::of::<K>(), namespace, name);
        self.lock().objects.contains_key(&key)
    }

    /// All objects of one kind
    pub fn objects<K>(&self) -> Vec<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let resource = ResourceType::of::<K>();
        self.lock()
            .objects
            .iter()
            .filter(|(key, _)| key.kind == resource.kind && key.api_version == resource.api_version())
            .filter_map(|(_, value)| serde_json::from_value(value.clone()).ok())
            .collect()
    }

    /// Snapshot of every stored object, keyed by `kind/namespace/name`
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.lock()
            .objects
            .iter()
            .map(|(key, value)| {
                (
                    format!("{}/{}/{}", key.kind, key.namespace, key.name),
                    value.clone(),
                )
            })
            .collect()
    }

    pub fn actions(&self) -> Vec<RecordedAction> {
        self.lock().actions.clone()
    }

    /// Recorded calls that change state
    pub fn mutations(&self) -> Vec<RecordedAction> {
        self.actions()
            .into_iter()
            .filter(|a| !matches!(a.verb, Verb::Get | Verb::List))
            .collect()
    }

    pub fn clear_actions(&self) {
        self.lock().actions.clear();
    }

    /// Make the next call with this verb on this kind fail with a transport error
    pub fn fail_next(&self, verb: Verb, kind: &str, message: &str) {
        self.lock().failures.push(InjectedFailure {
            verb,
            kind: kind.to_string(),
            message: message.to_string(),
        });
    }

    fn do_get(&self, resource: &ResourceType, namespace: Option<&str>, name: &str) -> Result<Option<Value>> {
        let mut state = self.lock();
        state.record(Verb::Get, resource, namespace, name, None);
        state.take_failure(Verb::Get, &resource.kind)?;
        Ok(state
            .objects
            .get(&ObjectKey::new(resource, namespace, name))
            .cloned())
    }

    fn do_list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>> {
        let mut state = self.lock();
        state.record(Verb::List, resource, namespace, "", None);
        state.take_failure(Verb::List, &resource.kind)?;
        let api_version = resource.api_version();
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == resource.kind && key.api_version == api_version)
            .filter(|(key, _)| namespace.map_or(true, |ns| key.namespace == ns))
            .filter(|(_, value)| label_selector.map_or(true, |s| matches_selector(value, s)))
            .map(|(_, value)| value.clone())
            .collect())
    }

    fn do_create(&self, resource: &ResourceType, namespace: Option<&str>, object: Value) -> Result<Value> {
        let mut state = self.lock();
        let mut object = with_type_meta(resource, object);
        if !object["metadata"].is_object() {
            object["metadata"] = json!({});
        }
        let name = match object["metadata"]["name"].as_str() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => match object["metadata"]["generateName"].as_str() {
                Some(prefix) => format!("{}{:05}", prefix, state.counter + 1),
                None => {
                    return Err(Error::ValidationError(format!(
                        "{} requires metadata.name",
                        resource.kind
                    )))
                }
            },
        };
        state.record(Verb::Create, resource, namespace, &name, Some(object.clone()));
        state.take_failure(Verb::Create, &resource.kind)?;

        let key = ObjectKey::new(resource, namespace, &name);
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: resource.kind.clone(),
                name,
            });
        }

        let version = state.next_version();
        let meta = &mut object["metadata"];
        meta["name"] = json!(name);
        if let Some(ns) = namespace {
            meta["namespace"] = json!(ns);
        }
        if meta["uid"].is_null() {
            meta["uid"] = json!(format!("uid-{}", version));
        }
        if meta["generation"].is_null() {
            meta["generation"] = json!(1);
        }
        meta["resourceVersion"] = json!(version.to_string());
        meta["creationTimestamp"] = json!(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        state.objects.insert(key, object.clone());
        Ok(object)
    }

    fn do_patch(
        &self,
        verb: Verb,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<Value> {
        let mut state = self.lock();
        state.record(verb, resource, namespace, name, Some(patch.clone()));
        state.take_failure(verb, &resource.kind)?;

        let key = ObjectKey::new(resource, namespace, name);
        let current = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(resource.kind.clone(), name))?;

        let mut patch = patch;
        if let Value::Object(map) = &mut patch {
            if verb == Verb::PatchStatus {
                map.retain(|key, _| key == "status");
            } else {
                map.remove("status");
            }
        }

        let mut updated = current.clone();
        apply_merge_patch(&mut updated, &patch);
        if updated != current {
            if verb == Verb::Patch && patch.get("spec").is_some() && updated["spec"] != current["spec"] {
                let generation = current["metadata"]["generation"].as_i64().unwrap_or(1);
                updated["metadata"]["generation"] = json!(generation + 1);
            }
            let version = state.next_version();
            updated["metadata"]["resourceVersion"] = json!(version.to_string());
        }
        state.store(key, updated.clone());
        Ok(updated)
    }

    fn do_delete(&self, resource: &ResourceType, namespace: Option<&str>, name: &str) -> Result<bool> {
        let mut state = self.lock();
        state.record(Verb::Delete, resource, namespace, name, None);
        state.take_failure(Verb::Delete, &resource.kind)?;

        let key = ObjectKey::new(resource, namespace, name);
        let Some(mut object) = state.objects.get(&key).cloned() else {
            return Ok(false);
        };
        if object["metadata"]["deletionTimestamp"].is_null() {
            object["metadata"]["deletionTimestamp"] =
                json!(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        state.store(key, object);
        Ok(true)
    }
}

/// Equality-based label selector matching (`a=b,c!=d,e`)
fn matches_selector(object: &Value, selector: &str) -> bool {
    let labels = &object["metadata"]["labels"];
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                labels[key.trim()].as_str() != Some(value.trim())
            } else if let Some((key, value)) = term.split_once('=') {
                labels[key.trim()].as_str() == Some(value.trim_start_matches('=').trim())
            } else {
                !labels[term].is_null()
            }
        })
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>> {
        self.do_get(resource, namespace, name)
    }

    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>> {
        self.do_list(resource, namespace, label_selector)
    }

    async fn create(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        object: Value,
    ) -> Result<Value> {
        self.do_create(resource, namespace, object)
    }

    async fn patch(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<Value> {
        self.do_patch(Verb::Patch, resource, namespace, name, patch)
    }

    async fn patch_status(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<Value> {
        self.do_patch(Verb::PatchStatus, resource, namespace, name, patch)
    }

    async fn delete(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        self.do_delete(resource, namespace, name)
    }
}
