//! SecretBinding: reference from a project to its infrastructure credentials

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::NamespaceResourceScope;
use kube::Resource;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use super::seed::SecretReference;

/// SecretBinding has no spec, so it is declared by hand instead of derived
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBinding {
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Secret holding the provider credentials
    pub secret_ref: SecretReference,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<SecretBindingProvider>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBindingProvider {
    #[serde(rename = "type")]
    pub type_: String,
}

impl Resource for SecretBinding {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "SecretBinding".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        "core.gardener.cloud".into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        "v1beta1".into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "secretbindings".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
