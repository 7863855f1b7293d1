//! Operator configuration read from the environment at startup

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;
/// Default chart directory
pub const DEFAULT_CHART_PATH: &str = "charts/gardenlet";
/// Default garden namespace
pub const DEFAULT_GARDEN_NAMESPACE: &str = "garden";

/// How bootstrap kubeconfigs reach the garden API server
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GardenAccess {
    /// Server URL written into bootstrap kubeconfigs
    pub server: Option<String>,
    /// PEM CA bundle of the garden API server
    pub ca_bundle: Option<String>,
    /// Raw garden kubeconfig handed to gardenlets that skip bootstrapping
    pub kubeconfig: Option<String>,
}

/// Settings of the controller loops
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerSettings {
    pub sync_period: Duration,
    pub wait_sync_period: Duration,
    pub sync_jitter_period: Duration,
    pub jitter_updates: bool,
    pub concurrent_syncs: u16,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            sync_period: Duration::from_secs(3600),
            wait_sync_period: Duration::from_secs(15),
            sync_jitter_period: Duration::from_secs(300),
            jitter_updates: false,
            concurrent_syncs: 5,
        }
    }
}

/// Operator configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    pub chart_path: PathBuf,
    pub image_vector_overwrite: Option<PathBuf>,
    pub garden_namespace: String,
    /// Only shoots scheduled onto this seed are handled
    pub seed_name: Option<String>,
    pub seed_kubeconfig: Option<PathBuf>,
    pub garden: GardenAccess,
    /// Parent gardenlet configuration (YAML)
    pub parent_gardenlet_config: Option<String>,
    pub controller: ControllerSettings,
    pub bootstrap_token_validity: Duration,
    pub credentials_rotation_interval: Duration,
    pub metrics_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            chart_path: PathBuf::from(DEFAULT_CHART_PATH),
            image_vector_overwrite: None,
            garden_namespace: DEFAULT_GARDEN_NAMESPACE.to_string(),
            seed_name: None,
            seed_kubeconfig: None,
            garden: GardenAccess::default(),
            parent_gardenlet_config: None,
            controller: ControllerSettings::default(),
            bootstrap_token_validity: Duration::from_secs(24 * 3600),
            credentials_rotation_interval: Duration::from_secs(90 * 24 * 3600),
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }
}

impl OperatorConfig {
    /// Read the configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        if let Some(path) = std::env::var_os("GARDEN_CA_FILE") {
            let ca = std::fs::read_to_string(&path).map_err(|e| {
                Error::ConfigError(format!("Failed to read GARDEN_CA_FILE: {}", e))
            })?;
            config.garden.ca_bundle = Some(ca);
        }
        if let Some(path) = std::env::var_os("GARDEN_KUBECONFIG") {
            let kubeconfig = std::fs::read_to_string(&path).map_err(|e| {
                Error::ConfigError(format!("Failed to read GARDEN_KUBECONFIG: {}", e))
            })?;
            config.garden.kubeconfig = Some(kubeconfig);
        }
        if let Some(path) = std::env::var_os("GARDENLET_CONFIG") {
            let parent = std::fs::read_to_string(&path).map_err(|e| {
                Error::ConfigError(format!("Failed to read GARDENLET_CONFIG: {}", e))
            })?;
            config.parent_gardenlet_config = Some(parent);
        }
        Ok(config)
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// File-valued variables are not read here.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let controller = ControllerSettings {
            sync_period: seconds(&get, "SYNC_PERIOD_SECONDS", defaults.controller.sync_period)?,
            wait_sync_period: seconds(
                &get,
                "WAIT_SYNC_PERIOD_SECONDS",
                defaults.controller.wait_sync_period,
            )?,
            sync_jitter_period: seconds(
                &get,
                "SYNC_JITTER_PERIOD_SECONDS",
                defaults.controller.sync_jitter_period,
            )?,
            jitter_updates: parsed(&get, "JITTER_UPDATES", defaults.controller.jitter_updates)?,
            concurrent_syncs: parsed(
                &get,
                "CONCURRENT_SYNCS",
                defaults.controller.concurrent_syncs,
            )?,
        };

        let rotation_days: u64 = parsed(&get, "CREDENTIALS_ROTATION_INTERVAL_DAYS", 90)?;

        Ok(Self {
            chart_path: get("GARDENLET_CHART_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.chart_path),
            image_vector_overwrite: get("IMAGEVECTOR_OVERWRITE").map(PathBuf::from),
            garden_namespace: get("GARDEN_NAMESPACE").unwrap_or(defaults.garden_namespace),
            seed_name: get("SEED_NAME"),
            seed_kubeconfig: get("SEED_KUBECONFIG").map(PathBuf::from),
            garden: GardenAccess {
                server: get("GARDEN_API_SERVER"),
                ..Default::default()
            },
            parent_gardenlet_config: None,
            controller,
            bootstrap_token_validity: seconds(
                &get,
                "BOOTSTRAP_TOKEN_VALIDITY_SECONDS",
                defaults.bootstrap_token_validity,
            )?,
            credentials_rotation_interval: Duration::from_secs(rotation_days * 24 * 3600),
            metrics_port: parsed(&get, "METRICS_PORT", defaults.metrics_port)?,
        })
    }
}

fn parsed<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::ConfigError(format!("Invalid value for {}: {}", key, e))),
        None => Ok(default),
    }
}

fn seconds<G>(get: &G, key: &str, default: Duration) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    parsed(get, key, default.as_secs()).map(Duration::from_secs)
}
