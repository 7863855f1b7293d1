//! [`ClusterClient`] backed by a real API server

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;
use tracing::debug;

use super::{ClusterClient, ResourceType};
use crate::{Error, Result};

/// Kubernetes API client for one cluster
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ResourceType, namespace: Option<&str>) -> Api<DynamicObject> {
        let api_resource = ApiResource {
            group: resource.group.clone(),
            version: resource.version.clone(),
            api_version: resource.api_version(),
            kind: resource.kind.clone(),
            plural: resource.plural.clone(),
        };
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &api_resource),
            None => Api::all_with(self.client.clone(), &api_resource),
        }
    }
}

fn to_value(object: DynamicObject) -> Result<Value> {
    Ok(serde_json::to_value(object)?)
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>> {
        let object = self.api(resource, namespace).get_opt(name).await?;
        object.map(to_value).transpose()
    }

    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self.api(resource, namespace).list(&params).await?;
        list.items.into_iter().map(to_value).collect()
    }

    async fn create(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        object: Value,
    ) -> Result<Value> {
        let object: DynamicObject = serde_json::from_value(object)?;
        let created = self
            .api(resource, namespace)
            .create(&PostParams::default(), &object)
            .await?;
        debug!(
            "Created {} {}",
            resource,
            created.metadata.name.as_deref().unwrap_or_default()
        );
        to_value(created)
    }

    async fn patch(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<Value> {
        let patched = self
            .api(resource, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        to_value(patched)
    }

    async fn patch_status(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<Value> {
        let patched = self
            .api(resource, namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        to_value(patched)
    }

    async fn delete(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        match self
            .api(resource, namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => {
                debug!("Deleted {} {}", resource, name);
                Ok(true)
            }
            Err(e) => match Error::from(e) {
                Error::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }
}
