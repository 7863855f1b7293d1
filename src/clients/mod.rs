//! Access to the garden, seed and shoot clusters
//!
//! All cluster I/O goes through [`ClusterClient`], an object-safe trait over
//! kind-erased JSON objects. [`ClusterHandle`] wraps it with typed helpers so
//! reconcilers work with `k8s_openapi` and CRD types directly.

pub mod kube_client;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod registry;

pub use kube_client::KubeClusterClient;
#[cfg(any(test, feature = "testing"))]
pub use memory::InMemoryCluster;
pub use registry::{ClientRegistry, KubeconfigClientFactory, ShootClientFactory};
#[cfg(any(test, feature = "testing"))]
pub use registry::StaticShootClientFactory;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

use crate::{Error, Result};

/// Group/version/kind/plural of a resource
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceType {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl ResourceType {
    pub fn of<K: Resource<DynamicType = ()>>() -> Self {
        Self {
            group: K::group(&()).to_string(),
            version: K::version(&()).to_string(),
            kind: K::kind(&()).to_string(),
            plural: K::plural(&()).to_string(),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.plural, self.group)
    }
}

/// Kind-erased access to one cluster
///
/// `namespace` is `None` for cluster-scoped objects (and for listing across
/// all namespaces). Patches are JSON merge patches.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>>;

    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>>;

    async fn create(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        object: Value,
    ) -> Result<Value>;

    async fn patch(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<Value>;

    async fn patch_status(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<Value>;

    /// Returns `false` when the object did not exist
    async fn delete(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool>;
}

/// Cheap, cloneable typed front of a [`ClusterClient`]
#[derive(Clone)]
pub struct ClusterHandle {
    inner: Arc<dyn ClusterClient>,
}

impl fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterHandle").finish_non_exhaustive()
    }
}

impl ClusterHandle {
    pub fn new(inner: Arc<dyn ClusterClient>) -> Self {
        Self { inner }
    }

    pub fn raw(&self) -> &dyn ClusterClient {
        self.inner.as_ref()
    }

    /// Fetch an object; absence is `Ok(None)`
    pub async fn get<K>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let resource = ResourceType::of::<K>();
        match self.inner.get(&resource, namespace, name).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Fetch an object that must exist
    pub async fn get_required<K>(&self, namespace: Option<&str>, name: &str) -> Result<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        self.get(namespace, name).await?.ok_or_else(|| {
            Error::not_found(K::kind(&()), qualified_name(namespace, name))
        })
    }

    pub async fn exists<K>(&self, namespace: Option<&str>, name: &str) -> Result<bool>
    where
        K: Resource<DynamicType = ()>,
    {
        let resource = ResourceType::of::<K>();
        Ok(self.inner.get(&resource, namespace, name).await?.is_some())
    }

    pub async fn list<K>(&self, namespace: Option<&str>, label_selector: Option<&str>) -> Result<Vec<K>>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let resource = ResourceType::of::<K>();
        self.inner
            .list(&resource, namespace, label_selector)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(Error::from))
            .collect()
    }

    /// Create an object in the namespace named by its metadata
    pub async fn create<K>(&self, object: &K) -> Result<K>
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    {
        let resource = ResourceType::of::<K>();
        let namespace = object.namespace();
        let body = with_type_meta(&resource, serde_json::to_value(object)?);
        let created = self
            .inner
            .create(&resource, namespace.as_deref(), body)
            .await?;
        Ok(serde_json::from_value(created)?)
    }

    pub async fn patch<K>(&self, namespace: Option<&str>, name: &str, patch: &Value) -> Result<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let resource = ResourceType::of::<K>();
        let patched = self
            .inner
            .patch(&resource, namespace, name, patch.clone())
            .await?;
        Ok(serde_json::from_value(patched)?)
    }

    pub async fn patch_status<K>(&self, namespace: Option<&str>, name: &str, patch: &Value) -> Result<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let resource = ResourceType::of::<K>();
        let patched = self
            .inner
            .patch_status(&resource, namespace, name, patch.clone())
            .await?;
        Ok(serde_json::from_value(patched)?)
    }

    /// Delete an object; returns whether it existed
    pub async fn delete<K>(&self, namespace: Option<&str>, name: &str) -> Result<bool>
    where
        K: Resource<DynamicType = ()>,
    {
        let resource = ResourceType::of::<K>();
        self.inner.delete(&resource, namespace, name).await
    }

    /// Create the object, or merge its desired labels, annotations, owner
    /// references and body into the existing one.
    pub async fn create_or_update<K>(&self, object: &K) -> Result<K>
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    {
        let resource = ResourceType::of::<K>();
        let namespace = object.namespace();
        let body = with_type_meta(&resource, serde_json::to_value(object)?);
        let created = self
            .create_or_update_raw(&resource, namespace.as_deref(), &object.name_any(), body)
            .await?;
        Ok(serde_json::from_value(created)?)
    }

    /// Kind-erased variant of [`ClusterHandle::create_or_update`]
    pub async fn create_or_update_raw(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
        body: Value,
    ) -> Result<Value> {
        if self.inner.get(resource, namespace, name).await?.is_none() {
            match self.inner.create(resource, namespace, body.clone()).await {
                Ok(created) => return Ok(created),
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(e),
            }
        }
        self.inner
            .patch(resource, namespace, name, update_patch(&body))
            .await
    }
}

/// Stamp apiVersion and kind onto a serialized object
pub fn with_type_meta(resource: &ResourceType, mut body: Value) -> Value {
    if let Value::Object(map) = &mut body {
        map.insert("apiVersion".to_string(), json!(resource.api_version()));
        map.insert("kind".to_string(), json!(resource.kind));
    }
    body
}

/// Merge patch carrying everything an update owns: the body without status
/// and server-managed metadata.
fn update_patch(body: &Value) -> Value {
    let mut patch = body.clone();
    if let Value::Object(map) = &mut patch {
        map.remove("status");
        if let Some(Value::Object(meta)) = map.remove("metadata") {
            let mut kept = serde_json::Map::new();
            for key in ["labels", "annotations", "ownerReferences"] {
                if let Some(value) = meta.get(key) {
                    kept.insert(key.to_string(), value.clone());
                }
            }
            map.insert("metadata".to_string(), Value::Object(kept));
        }
    }
    patch
}

fn qualified_name(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}
