//! Backup and seed kubeconfig secrets in the garden
//!
//! Both secrets are owned by the ManagedSeed. They are created when absent and
//! never updated afterwards.

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::secrets::get_secret;
use crate::clients::ClusterHandle;
use crate::crd::{ManagedSeed, SecretBinding, SecretReference, SeedTemplate, Shoot};
use crate::{Error, Result};

/// Key of the kubeconfig in the seed kubeconfig secret
pub const SEED_KUBECONFIG_KEY: &str = "kubeconfig";

/// Secret references of the template resolved against the ManagedSeed namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedSecretRefs {
    pub backup: Option<SecretReference>,
    pub kubeconfig: Option<SecretReference>,
}

impl SeedSecretRefs {
    pub fn from_template(managed_seed: &ManagedSeed, template: &SeedTemplate) -> Self {
        let namespace = managed_seed.namespace().unwrap_or_default();
        let resolve = |r: &SecretReference| SecretReference::new(r.name.clone(), r.namespace_or(&namespace));
        Self {
            backup: template.spec.backup.as_ref().map(|b| resolve(&b.secret_ref)),
            kubeconfig: template.spec.secret_ref.as_ref().map(resolve),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &SecretReference> {
        self.backup.iter().chain(self.kubeconfig.iter())
    }
}

/// Data of the infrastructure secret referenced by the shoot's SecretBinding
pub async fn shoot_provider_secret_data(
    garden: &ClusterHandle,
    shoot: &Shoot,
) -> Result<BTreeMap<String, ByteString>> {
    let namespace = shoot.namespace().unwrap_or_default();
    let binding_name = shoot.spec.secret_binding_name.as_deref().ok_or_else(|| {
        Error::ValidationError(format!(
            "shoot {} has no secretBindingName",
            shoot.name_any()
        ))
    })?;
    let binding = garden
        .get_required::<SecretBinding>(Some(&namespace), binding_name)
        .await?;
    let secret = get_secret(
        garden,
        binding.secret_ref.namespace_or(&namespace),
        &binding.secret_ref.name,
    )
    .await?;
    Ok(secret.data.unwrap_or_default())
}

fn owned_secret(
    managed_seed: &ManagedSeed,
    reference: &SecretReference,
    data: BTreeMap<String, ByteString>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(reference.name.clone()),
            namespace: reference.namespace.clone(),
            owner_references: Some(vec![managed_seed.owner_reference()]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

async fn create_if_absent(garden: &ClusterHandle, secret: Secret) -> Result<()> {
    let name = secret.name_any();
    let namespace = secret.namespace();
    if garden.exists::<Secret>(namespace.as_deref(), &name).await? {
        debug!("Secret {} already exists, leaving it untouched", name);
        return Ok(());
    }
    match garden.create(&secret).await {
        Ok(_) => {
            info!("Created secret {}", name);
            Ok(())
        }
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Create the backup and seed kubeconfig secrets that do not exist yet
pub async fn ensure_seed_secrets(
    garden: &ClusterHandle,
    managed_seed: &ManagedSeed,
    shoot: &Shoot,
    template: &SeedTemplate,
    shoot_kubeconfig: &str,
) -> Result<()> {
    let refs = SeedSecretRefs::from_template(managed_seed, template);

    if let Some(backup) = &refs.backup {
        let data = shoot_provider_secret_data(garden, shoot).await?;
        create_if_absent(garden, owned_secret(managed_seed, backup, data)).await?;
    }

    if let Some(kubeconfig) = &refs.kubeconfig {
        let data = BTreeMap::from([(
            SEED_KUBECONFIG_KEY.to_string(),
            ByteString(shoot_kubeconfig.as_bytes().to_vec()),
        )]);
        create_if_absent(garden, owned_secret(managed_seed, kubeconfig, data)).await?;
    }

    Ok(())
}

/// Delete whichever seed secrets still exist; returns whether any did
pub async fn delete_seed_secrets(garden: &ClusterHandle, refs: &SeedSecretRefs) -> Result<bool> {
    let mut remaining = false;
    for reference in refs.iter() {
        if garden
            .delete::<Secret>(reference.namespace.as_deref(), &reference.name)
            .await?
        {
            info!("Deleted secret {}", reference.name);
            remaining = true;
        }
    }
    Ok(remaining)
}
