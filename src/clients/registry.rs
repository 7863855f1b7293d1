//! Client registry for the garden, seed and shoot clusters
//!
//! Shoot clients are built from the `<shoot>.kubeconfig` secret in the garden
//! and cached per shoot. A cached client is rebuilt when the kubeconfig
//! checksum changes.

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{ClusterHandle, KubeClusterClient};
use crate::adapters::secrets::{get_secret_key, shoot_kubeconfig_secret_name};
use crate::crd::Shoot;
use crate::{Error, Result};

/// Key within the shoot kubeconfig secret
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Builds a client for a shoot from its kubeconfig
#[async_trait]
pub trait ShootClientFactory: Send + Sync {
    async fn client_for(&self, shoot: &Shoot, kubeconfig: &str) -> Result<ClusterHandle>;
}

/// Factory producing kube-backed clients
#[derive(Clone, Debug, Default)]
pub struct KubeconfigClientFactory;

impl KubeconfigClientFactory {
    /// Build a kube client from a kubeconfig document
    pub async fn client_from_kubeconfig(kubeconfig: &str) -> Result<Client> {
        let kubeconfig = Kubeconfig::from_yaml(kubeconfig)
            .map_err(|e| Error::ConfigError(format!("Invalid kubeconfig: {}", e)))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::ConfigError(format!("Unusable kubeconfig: {}", e)))?;
        Client::try_from(config).map_err(|e| Error::KubeError(e.to_string()))
    }
}

#[async_trait]
impl ShootClientFactory for KubeconfigClientFactory {
    async fn client_for(&self, shoot: &Shoot, kubeconfig: &str) -> Result<ClusterHandle> {
        debug!("Building client for shoot {}", shoot.name_any());
        let client = Self::client_from_kubeconfig(kubeconfig).await?;
        Ok(ClusterHandle::new(Arc::new(KubeClusterClient::new(client))))
    }
}

struct CachedClient {
    checksum: String,
    handle: ClusterHandle,
}

/// Clients for every cluster the operator talks to
pub struct ClientRegistry {
    garden: ClusterHandle,
    seed: ClusterHandle,
    factory: Arc<dyn ShootClientFactory>,
    shoots: RwLock<HashMap<String, CachedClient>>,
}

impl ClientRegistry {
    pub fn new(garden: ClusterHandle, seed: ClusterHandle, factory: Arc<dyn ShootClientFactory>) -> Self {
        Self {
            garden,
            seed,
            factory,
            shoots: RwLock::new(HashMap::new()),
        }
    }

    /// The garden cluster hosting ManagedSeeds, Shoots and Seeds
    pub fn garden(&self) -> &ClusterHandle {
        &self.garden
    }

    /// The seed cluster hosting the shoot control planes
    pub fn seed(&self) -> &ClusterHandle {
        &self.seed
    }

    /// Read the admin kubeconfig of a shoot from the garden
    pub async fn shoot_kubeconfig(&self, shoot: &Shoot) -> Result<String> {
        let namespace = shoot.namespace().unwrap_or_default();
        let secret_name = shoot_kubeconfig_secret_name(&shoot.name_any());
        get_secret_key(&self.garden, &namespace, &secret_name, KUBECONFIG_KEY).await
    }

    /// Client for a shoot, reusing the cached one while its kubeconfig is unchanged
    pub async fn shoot(&self, shoot: &Shoot) -> Result<ClusterHandle> {
        let kubeconfig = self.shoot_kubeconfig(shoot).await?;
        let checksum = checksum(&kubeconfig);
        let key = cache_key(shoot);

        if let Some(cached) = self.shoots.read().await.get(&key) {
            if cached.checksum == checksum {
                return Ok(cached.handle.clone());
            }
        }

        let handle = self.factory.client_for(shoot, &kubeconfig).await?;
        let mut shoots = self.shoots.write().await;
        if shoots
            .insert(
                key.clone(),
                CachedClient {
                    checksum,
                    handle: handle.clone(),
                },
            )
            .is_some()
        {
            info!("Kubeconfig of shoot {} changed, client rebuilt", key);
        }
        Ok(handle)
    }

    /// Drop the cached client of a shoot
    pub async fn forget_shoot(&self, shoot: &Shoot) {
        self.shoots.write().await.remove(&cache_key(shoot));
    }
}

fn cache_key(shoot: &Shoot) -> String {
    format!("{}/{}", shoot.namespace().unwrap_or_default(), shoot.name_any())
}

fn checksum(data: &str) -> String {
    Sha256::digest(data.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Factory handing out one fixed handle for every shoot
#[cfg(any(test, feature = "testing"))]
#[derive(Clone)]
pub struct StaticShootClientFactory {
    handle: ClusterHandle,
}

#[cfg(any(test, feature = "testing"))]
impl StaticShootClientFactory {
    pub fn new(handle: ClusterHandle) -> Self {
        Self { handle }
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl ShootClientFactory for StaticShootClientFactory {
    async fn client_for(&self, _shoot: &Shoot, _kubeconfig: &str) -> Result<ClusterHandle> {
        Ok(self.handle.clone())
    }
}
