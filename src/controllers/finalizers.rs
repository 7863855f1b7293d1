//! Finalizer management through merge patches of `metadata.finalizers`

use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::info;

use crate::clients::ClusterHandle;
use crate::Result;

pub fn has_finalizer<K: ResourceExt>(object: &K, finalizer: &str) -> bool {
    object.finalizers().iter().any(|f| f == finalizer)
}

/// Add `finalizer` if it is missing. Returns whether a patch was sent.
pub async fn ensure_finalizer<K>(client: &ClusterHandle, object: &K, finalizer: &str) -> Result<bool>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    if has_finalizer(object, finalizer) {
        return Ok(false);
    }

    let mut finalizers = object.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    client
        .patch::<K>(object.namespace().as_deref(), &object.name_any(), &patch)
        .await?;

    info!(
        "Added finalizer {} to {} {}",
        finalizer,
        K::kind(&()),
        object.name_any()
    );
    Ok(true)
}

/// Drop `finalizer` if present. Returns whether a patch was sent.
pub async fn remove_finalizer<K>(client: &ClusterHandle, object: &K, finalizer: &str) -> Result<bool>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    if !has_finalizer(object, finalizer) {
        return Ok(false);
    }

    let finalizers: Vec<&String> = object
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != finalizer)
        .collect();
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    client
        .patch::<K>(object.namespace().as_deref(), &object.name_any(), &patch)
        .await?;

    info!(
        "Removed finalizer {} from {} {}",
        finalizer,
        K::kind(&()),
        object.name_any()
    );
    Ok(true)
}
