//! Garden credentials for an in-shoot gardenlet
//!
//! A gardenlet starts with a short-lived bootstrap kubeconfig and exchanges it
//! for a durable client certificate, which it stores in the
//! `gardenlet-kubeconfig` secret inside the shoot. Bootstrap tokens live in the
//! shoot cluster's `kube-system` namespace, named deterministically after the
//! ManagedSeed so they can be found again without local state.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use rand::Rng;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::secrets::secret_key;
use crate::clients::ClusterHandle;
use crate::config::GardenAccess;
use crate::crd::{Bootstrap, ManagedSeed};
use crate::metrics::prometheus::BOOTSTRAP_TOKENS_MINTED;
use crate::{Error, Result};

/// Secret in the shoot holding the gardenlet's durable garden kubeconfig
pub const GARDENLET_KUBECONFIG_SECRET: &str = "gardenlet-kubeconfig";
/// Secret in the shoot holding the bootstrap kubeconfig
pub const GARDENLET_BOOTSTRAP_KUBECONFIG_SECRET: &str = "gardenlet-kubeconfig-bootstrap";

pub const BOOTSTRAP_TOKEN_NAMESPACE: &str = "kube-system";
pub const BOOTSTRAP_TOKEN_SECRET_TYPE: &str = "bootstrap.kubernetes.io/token";
pub const SEED_BOOTSTRAPPER_CLUSTER_ROLE: &str = "gardener.cloud:system:seed-bootstrapper";

const TOKEN_ID_KEY: &str = "token-id";
const TOKEN_SECRET_KEY: &str = "token-secret";
const EXPIRATION_KEY: &str = "expiration";
const MAX_ATTEMPTS: usize = 3;
const KUBECONFIG_CONTEXT: &str = "gardenlet-bootstrap";

/// Credentials handed to the gardenlet chart
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GardenCredentials {
    /// Bootstrap flow; `None` when the gardenlet already holds a durable kubeconfig
    Bootstrap(Option<String>),
    /// Raw garden kubeconfig, no bootstrapping
    Kubeconfig(String),
}

/// Deterministic six hex character token ID for a ManagedSeed
pub fn token_id(namespace: &str, name: &str) -> String {
    let digest = Sha256::digest(format!("{}--{}", namespace, name).as_bytes());
    digest.iter().take(3).map(|b| format!("{:02x}", b)).collect()
}

pub fn bootstrap_token_secret_name(token_id: &str) -> String {
    format!("bootstrap-token-{}", token_id)
}

pub fn service_account_name(managed_seed_name: &str) -> String {
    format!("gardenlet-bootstrap-{}", managed_seed_name)
}

fn cluster_role_binding_name(namespace: &str, service_account: &str) -> String {
    format!("{}:{}:{}", SEED_BOOTSTRAPPER_CLUSTER_ROLE, namespace, service_account)
}

fn service_account_token_secret_name(service_account: &str) -> String {
    format!("{}-token", service_account)
}

fn random_token_secret() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

fn token_expired(secret: &Secret, now: DateTime<Utc>) -> bool {
    match secret_key(secret, EXPIRATION_KEY) {
        Ok(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|expiry| expiry.with_timezone(&Utc) <= now)
            .unwrap_or(true),
        Err(_) => false,
    }
}

/// Mints bootstrap credentials for in-shoot gardenlets.
///
/// Bootstrap tokens are written to the shoot; service account credentials
/// live in the garden.
pub struct BootstrapMinter<'a> {
    garden: &'a ClusterHandle,
    access: &'a GardenAccess,
    validity: Duration,
}

impl<'a> BootstrapMinter<'a> {
    pub fn new(garden: &'a ClusterHandle, access: &'a GardenAccess, validity: Duration) -> Self {
        Self {
            garden,
            access,
            validity,
        }
    }

    /// Work out the garden credentials for the gardenlet of `managed_seed`.
    ///
    /// With `already_bootstrapped_check` set, an existing durable kubeconfig in
    /// the shoot short-circuits bootstrapping.
    pub async fn prepare_garden_client_connection(
        &self,
        shoot: &ClusterHandle,
        shoot_garden_namespace: &str,
        managed_seed: &ManagedSeed,
        bootstrap: Bootstrap,
        already_bootstrapped_check: bool,
    ) -> Result<GardenCredentials> {
        if bootstrap == Bootstrap::None {
            let kubeconfig = self.access.kubeconfig.clone().ok_or_else(|| {
                Error::ConfigError(
                    "GARDEN_KUBECONFIG is required for gardenlets without bootstrap".to_string(),
                )
            })?;
            return Ok(GardenCredentials::Kubeconfig(kubeconfig));
        }

        if already_bootstrapped_check
            && shoot
                .exists::<Secret>(Some(shoot_garden_namespace), GARDENLET_KUBECONFIG_SECRET)
                .await?
        {
            debug!(
                "Gardenlet of {} already holds a garden kubeconfig",
                managed_seed.name_any()
            );
            return Ok(GardenCredentials::Bootstrap(None));
        }

        let token = match bootstrap {
            Bootstrap::ServiceAccount => self.service_account_token(managed_seed).await?,
            _ => self.bootstrap_token(shoot, managed_seed).await?,
        };
        Ok(GardenCredentials::Bootstrap(Some(self.render_kubeconfig(&token)?)))
    }

    /// Look up or create the bootstrap token in the shoot's `kube-system` and
    /// return it as `<id>.<secret>`
    pub async fn bootstrap_token(&self, shoot: &ClusterHandle, managed_seed: &ManagedSeed) -> Result<String> {
        let namespace = managed_seed.namespace().unwrap_or_default();
        let name = managed_seed.name_any();
        let id = token_id(&namespace, &name);
        let secret_name = bootstrap_token_secret_name(&id);

        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            if let Some(existing) = shoot
                .get::<Secret>(Some(BOOTSTRAP_TOKEN_NAMESPACE), &secret_name)
                .await?
            {
                if !token_expired(&existing, Utc::now()) {
                    let token_secret = secret_key(&existing, TOKEN_SECRET_KEY)?;
                    return Ok(format!("{}.{}", id, token_secret));
                }
                info!("Bootstrap token {} expired, rotating", secret_name);
                shoot
                    .delete::<Secret>(Some(BOOTSTRAP_TOKEN_NAMESPACE), &secret_name)
                    .await?;
            }

            let token_secret = random_token_secret();
            let secret = self.bootstrap_token_secret(&namespace, &name, &id, &token_secret);
            match shoot.create(&secret).await {
                Ok(_) => {
                    BOOTSTRAP_TOKENS_MINTED.inc();
                    info!("Minted bootstrap token {} for {}/{}", id, namespace, name);
                    return Ok(format!("{}.{}", id, token_secret));
                }
                Err(e) if e.is_already_exists() => {
                    warn!(
                        "Bootstrap token {} created concurrently (attempt {}/{})",
                        secret_name, attempt, MAX_ATTEMPTS
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            Error::Conflict(format!("could not obtain bootstrap token {}", secret_name))
        }))
    }

    fn bootstrap_token_secret(&self, namespace: &str, name: &str, id: &str, token_secret: &str) -> Secret {
        let validity = ChronoDuration::from_std(self.validity).unwrap_or_else(|_| ChronoDuration::days(1));
        let expiration = (Utc::now() + validity).to_rfc3339_opts(SecondsFormat::Secs, true);
        let data: BTreeMap<String, ByteString> = [
            ("description", format!("A bootstrap token for the gardenlet of managed seed {}/{}.", namespace, name)),
            (TOKEN_ID_KEY, id.to_string()),
            (TOKEN_SECRET_KEY, token_secret.to_string()),
            (EXPIRATION_KEY, expiration),
            ("usage-bootstrap-authentication", "true".to_string()),
            ("usage-bootstrap-signing", "true".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.into_bytes())))
        .collect();

        Secret {
            metadata: ObjectMeta {
                name: Some(bootstrap_token_secret_name(id)),
                namespace: Some(BOOTSTRAP_TOKEN_NAMESPACE.to_string()),
                ..Default::default()
            },
            type_: Some(BOOTSTRAP_TOKEN_SECRET_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        }
    }

    /// Ensure the bootstrap service account and return its token
    pub async fn service_account_token(&self, managed_seed: &ManagedSeed) -> Result<String> {
        let namespace = managed_seed.namespace().unwrap_or_default();
        let sa_name = service_account_name(&managed_seed.name_any());

        let service_account = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(sa_name.clone()),
                namespace: Some(namespace.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        self.garden.create_or_update(&service_account).await?;

        let binding = ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(cluster_role_binding_name(&namespace, &sa_name)),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: SEED_BOOTSTRAPPER_CLUSTER_ROLE.to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: sa_name.clone(),
                namespace: Some(namespace.clone()),
                ..Default::default()
            }]),
        };
        self.garden.create_or_update(&binding).await?;

        let token_secret = Secret {
            metadata: ObjectMeta {
                name: Some(service_account_token_secret_name(&sa_name)),
                namespace: Some(namespace.clone()),
                annotations: Some(BTreeMap::from([(
                    "kubernetes.io/service-account.name".to_string(),
                    sa_name.clone(),
                )])),
                ..Default::default()
            },
            type_: Some("kubernetes.io/service-account-token".to_string()),
            ..Default::default()
        };
        let secret = match self
            .garden
            .get::<Secret>(Some(&namespace), &token_secret.name_any())
            .await?
        {
            Some(secret) => secret,
            None => self.garden.create(&token_secret).await?,
        };

        secret_key(&secret, "token").map_err(|_| {
            Error::KubeError(format!(
                "token of service account {}/{} not populated yet",
                namespace, sa_name
            ))
        })
    }

    /// Render a kubeconfig authenticating with `token` against the garden
    pub fn render_kubeconfig(&self, token: &str) -> Result<String> {
        let server = self.access.server.as_deref().ok_or_else(|| {
            Error::ConfigError("GARDEN_API_SERVER is required for gardenlet bootstrapping".to_string())
        })?;

        let mut cluster = json!({ "server": server });
        if let Some(ca) = &self.access.ca_bundle {
            cluster["certificate-authority-data"] = json!(STANDARD.encode(ca.as_bytes()));
        }

        let kubeconfig = json!({
            "apiVersion": "v1",
            "kind": "Config",
            "current-context": KUBECONFIG_CONTEXT,
            "clusters": [{ "name": "garden", "cluster": cluster }],
            "contexts": [{
                "name": KUBECONFIG_CONTEXT,
                "context": { "cluster": "garden", "user": KUBECONFIG_CONTEXT },
            }],
            "users": [{ "name": KUBECONFIG_CONTEXT, "user": { "token": token } }],
        });
        Ok(serde_yaml::to_string(&kubeconfig)?)
    }

    /// Remove the bootstrap token from the shoot and the service account
    /// artifacts from the garden
    pub async fn cleanup(&self, shoot: &ClusterHandle, managed_seed: &ManagedSeed) -> Result<()> {
        let namespace = managed_seed.namespace().unwrap_or_default();
        let name = managed_seed.name_any();
        let sa_name = service_account_name(&name);

        shoot
            .delete::<Secret>(
                Some(BOOTSTRAP_TOKEN_NAMESPACE),
                &bootstrap_token_secret_name(&token_id(&namespace, &name)),
            )
            .await?;
        self.garden
            .delete::<Secret>(Some(&namespace), &service_account_token_secret_name(&sa_name))
            .await?;
        self.garden
            .delete::<ClusterRoleBinding>(None, &cluster_role_binding_name(&namespace, &sa_name))
            .await?;
        self.garden
            .delete::<ServiceAccount>(Some(&namespace), &sa_name)
            .await?;
        Ok(())
    }
}
