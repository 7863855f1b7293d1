//! Secret lookups in the garden cluster

use k8s_openapi::api::core::v1::Secret;
use std::collections::BTreeMap;

use crate::clients::ClusterHandle;
use crate::crd::LABEL_GARDEN_ROLE;
use crate::{Error, Result};

/// Garden role of the secret describing the internal DNS domain
pub const GARDEN_ROLE_INTERNAL_DOMAIN: &str = "internal-domain";

pub const ANNOTATION_DNS_DOMAIN: &str = "dns.gardener.cloud/domain";
pub const ANNOTATION_DNS_PROVIDER: &str = "dns.gardener.cloud/provider";
pub const ANNOTATION_DNS_ZONE: &str = "dns.gardener.cloud/zone";

/// DNS domain served by a provider, as announced by a garden secret
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Domain {
    pub domain: String,
    pub provider: String,
    pub zone: Option<String>,
}

/// Fetch a secret by name from the given namespace
pub async fn get_secret(client: &ClusterHandle, namespace: &str, name: &str) -> Result<Secret> {
    client.get_required::<Secret>(Some(namespace), name).await
}

/// Fetch a secret and return one of its keys as a string
pub async fn get_secret_key(
    client: &ClusterHandle,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<String> {
    let secret = get_secret(client, namespace, name).await?;
    secret_key(&secret, key)
}

/// Get a specific key from a secret
pub fn secret_key(secret: &Secret, key: &str) -> Result<String> {
    let data = secret
        .data
        .as_ref()
        .ok_or_else(|| Error::SecretError("Secret has no data".to_string()))?;

    let value = data
        .get(key)
        .ok_or_else(|| Error::SecretError(format!("Key '{}' not found in secret", key)))?;

    String::from_utf8(value.0.clone())
        .map_err(|e| Error::SecretError(format!("Invalid UTF-8 in secret key '{}': {}", key, e)))
}

/// Name of the garden secret holding a shoot's admin kubeconfig
pub fn shoot_kubeconfig_secret_name(shoot_name: &str) -> String {
    format!("{}.kubeconfig", shoot_name)
}

/// Secrets in `namespace` carrying a garden role label, keyed by role
pub async fn read_garden_role_secrets(
    client: &ClusterHandle,
    namespace: &str,
) -> Result<BTreeMap<String, Secret>> {
    let secrets = client
        .list::<Secret>(Some(namespace), Some(LABEL_GARDEN_ROLE))
        .await?;
    Ok(secrets
        .into_iter()
        .filter_map(|secret| {
            let role = secret.metadata.labels.as_ref()?.get(LABEL_GARDEN_ROLE)?.clone();
            Some((role, secret))
        })
        .collect())
}

/// Internal domain of the landscape.
///
/// An empty secret map yields `Ok(None)` rather than an error; callers that
/// need a domain must treat that case themselves.
pub fn get_internal_domain(secrets: &BTreeMap<String, Secret>) -> Result<Option<Domain>> {
    if secrets.is_empty() {
        return Ok(None);
    }
    let secret = secrets.get(GARDEN_ROLE_INTERNAL_DOMAIN).ok_or_else(|| {
        Error::ConfigError(format!(
            "missing secret with garden role {}",
            GARDEN_ROLE_INTERNAL_DOMAIN
        ))
    })?;
    domain_from_secret(secret).map(Some)
}

fn domain_from_secret(secret: &Secret) -> Result<Domain> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    let annotations = secret.metadata.annotations.clone().unwrap_or_default();
    let required = |key: &str| {
        annotations
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| {
                Error::ConfigError(format!("secret {} is missing annotation {}", name, key))
            })
    };
    Ok(Domain {
        domain: required(ANNOTATION_DNS_DOMAIN)?,
        provider: required(ANNOTATION_DNS_PROVIDER)?,
        zone: annotations.get(ANNOTATION_DNS_ZONE).cloned(),
    })
}
