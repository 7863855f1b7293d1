//! ManagedSeed Kubernetes Operator
//!
//! Main entry point for the operator. Reads the configuration, connects to the
//! garden and seed clusters, loads the gardenlet chart and runs the
//! ManagedSeed, ManagedSeedSet and shoot status controllers.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use managed_seed_operator::{
    adapters::chart::GardenletChart,
    adapters::secrets::{get_internal_domain, read_garden_role_secrets},
    clients::{ClientRegistry, ClusterHandle, KubeClusterClient, KubeconfigClientFactory},
    config::OperatorConfig,
    controllers::{
        managed_seed_controller, managed_seed_set_controller, shoot_status_controller, Context,
    },
    crd::GardenletConfiguration,
    events::KubeEventPublisher,
    metrics,
    reconcilers::actuator::Actuator,
};

/// Name under which Events are reported
const EVENT_SOURCE: &str = "managedseed-controller";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("Starting ManagedSeed Operator");

    let config = OperatorConfig::from_env()?;

    // Create Kubernetes clients
    let client = Client::try_default().await?;
    let garden = ClusterHandle::new(Arc::new(KubeClusterClient::new(client.clone())));
    info!("Connected to garden API server");

    let seed_client = match &config.seed_kubeconfig {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            KubeconfigClientFactory::client_from_kubeconfig(&raw).await?
        }
        None => client.clone(),
    };
    let seed = ClusterHandle::new(Arc::new(KubeClusterClient::new(seed_client)));
    let registry = Arc::new(ClientRegistry::new(
        garden.clone(),
        seed,
        Arc::new(KubeconfigClientFactory),
    ));

    // Chart and parent gardenlet values are read once
    let chart = GardenletChart::load(&config.chart_path, config.image_vector_overwrite.as_deref())?;
    let parent_config = config
        .parent_gardenlet_config
        .as_deref()
        .map(serde_yaml::from_str::<GardenletConfiguration>)
        .transpose()?;
    let values = chart.values_helper(&config.garden_namespace, parent_config)?;

    let role_secrets = read_garden_role_secrets(&garden, &config.garden_namespace).await?;
    match get_internal_domain(&role_secrets) {
        Ok(Some(domain)) => info!(
            "Internal domain is {} (provider {})",
            domain.domain, domain.provider
        ),
        Ok(None) => warn!(
            "No garden role secrets found in namespace {}",
            config.garden_namespace
        ),
        Err(e) => warn!("Failed to determine internal domain: {}", e),
    }

    let events = Arc::new(KubeEventPublisher::new(garden, EVENT_SOURCE));
    let actuator = Actuator::new(
        registry,
        Arc::new(chart),
        values,
        events,
        config.garden.clone(),
        config.bootstrap_token_validity,
    );

    let cancel = CancellationToken::new();
    let metrics_port = config.metrics_port;
    let context = Context::new(actuator, config, cancel.clone());

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(metrics_port));
    info!("Metrics server starting on port {}", metrics_port);

    // Run the controllers
    let managed_seed_handle = tokio::spawn(managed_seed_controller::run(context.clone(), client.clone()));
    let managed_seed_set_handle =
        tokio::spawn(managed_seed_set_controller::run(context.clone(), client.clone()));
    let shoot_status_handle = tokio::spawn(shoot_status_controller::run(context, client));

    // Handle graceful shutdown
    tokio::select! {
        _ = managed_seed_handle => {
            error!("ManagedSeed controller exited unexpectedly");
        }
        _ = managed_seed_set_handle => {
            error!("ManagedSeedSet controller exited unexpectedly");
        }
        _ = shoot_status_handle => {
            error!("Shoot status controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }
    cancel.cancel();

    info!("ManagedSeed Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,managed_seed_operator=debug,kube=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install CTRL+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
