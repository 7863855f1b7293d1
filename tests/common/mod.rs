//! Fixtures shared by the integration tests: a garden, seed and shoot cluster
//! held in memory, and the objects a promotion needs.

#![allow(dead_code)]

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use managed_seed_operator::adapters::chart::GardenletChart;
use managed_seed_operator::adapters::image_vector::{ImageSource, ImageVector};
use managed_seed_operator::adapters::secrets::shoot_kubeconfig_secret_name;
use managed_seed_operator::clients::{ClientRegistry, InMemoryCluster, StaticShootClientFactory};
use managed_seed_operator::config::GardenAccess;
use managed_seed_operator::crd::{
    Gardenlet, GardenletConfiguration, LastOperation, LastOperationState, LastOperationType,
    ManagedSeed, ManagedSeedSpec, SecretBinding, SecretReference, SeedBackup, SeedProvider,
    SeedSpec, SeedTemplate, Shoot, ShootReference, ShootSpec, ShootStatus,
};
use managed_seed_operator::events::RecordingEventPublisher;
use managed_seed_operator::reconcilers::actuator::Actuator;

pub const GARDEN_NS: &str = "garden";
pub const MANAGED_SEED: &str = "ms-1";
pub const SHOOT: &str = "shoot-1";
pub const BACKUP_SECRET: &str = "backup-ms-1";
pub const SEED_KUBECONFIG_SECRET: &str = "seed-kubeconfig-ms-1";
pub const SHOOT_KUBECONFIG: &str = "apiVersion: v1\nkind: Config\nclusters: []\n";
pub const GARDEN_SERVER: &str = "https://api.garden.example.org";

pub struct Landscape {
    pub garden: Arc<InMemoryCluster>,
    pub seed: Arc<InMemoryCluster>,
    pub shoot: Arc<InMemoryCluster>,
    pub events: Arc<RecordingEventPublisher>,
    pub actuator: Actuator,
}

pub fn image_vector() -> ImageVector {
    ImageVector {
        images: vec![ImageSource {
            name: "gardenlet".to_string(),
            source_repository: None,
            repository: "eu.gcr.io/gardener-project/gardener/gardenlet".to_string(),
            tag: Some("v1.80.0".to_string()),
        }],
    }
}

pub fn garden_access() -> GardenAccess {
    GardenAccess {
        server: Some(GARDEN_SERVER.to_string()),
        ca_bundle: None,
        kubeconfig: Some("apiVersion: v1\nkind: Config\n".to_string()),
    }
}

/// Clusters plus an actuator wired onto them, with the shoot's supporting
/// objects already in the garden
pub fn landscape() -> Landscape {
    let garden = InMemoryCluster::new();
    let seed = InMemoryCluster::new();
    let shoot = InMemoryCluster::new();
    let events = Arc::new(RecordingEventPublisher::default());

    let registry = Arc::new(ClientRegistry::new(
        garden.handle(),
        seed.handle(),
        Arc::new(StaticShootClientFactory::new(shoot.handle())),
    ));
    let chart = GardenletChart::new(json!({}), image_vector());
    let values = chart
        .values_helper(GARDEN_NS, None)
        .expect("values helper");
    let actuator = Actuator::new(
        registry,
        Arc::new(chart),
        values,
        events.clone(),
        garden_access(),
        Duration::from_secs(3600),
    );

    garden.insert(&secret_binding());
    garden.insert(&secret(GARDEN_NS, "infra-credentials", &[("accessKeyID", "AKIA"), ("secretAccessKey", "s3cr3t")]));
    garden.insert(&secret(
        GARDEN_NS,
        &shoot_kubeconfig_secret_name(SHOOT),
        &[("kubeconfig", SHOOT_KUBECONFIG)],
    ));

    Landscape {
        garden,
        seed,
        shoot,
        events,
        actuator,
    }
}

pub fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

pub fn secret_binding() -> SecretBinding {
    SecretBinding {
        metadata: ObjectMeta {
            name: Some("infra".to_string()),
            namespace: Some(GARDEN_NS.to_string()),
            ..Default::default()
        },
        secret_ref: SecretReference {
            name: "infra-credentials".to_string(),
            namespace: None,
        },
        provider: None,
    }
}

/// Shoot whose reconciler has caught up with generation 1
pub fn settled_shoot() -> Shoot {
    let mut shoot = Shoot::new(
        SHOOT,
        ShootSpec {
            secret_binding_name: Some("infra".to_string()),
            seed_name: Some("soil".to_string()),
            region: Some("eu-west-1".to_string()),
            ..Default::default()
        },
    );
    shoot.metadata.namespace = Some(GARDEN_NS.to_string());
    shoot.metadata.generation = Some(1);
    shoot.status = Some(ShootStatus {
        observed_generation: 1,
        last_operation: Some(last_operation(LastOperationType::Reconcile, LastOperationState::Succeeded)),
        ..Default::default()
    });
    shoot
}

pub fn last_operation(type_: LastOperationType, state: LastOperationState) -> LastOperation {
    LastOperation {
        type_,
        state,
        description: String::new(),
        progress: 100,
        last_update_time: None,
    }
}

pub fn seed_template() -> SeedTemplate {
    let mut template = SeedTemplate {
        spec: SeedSpec {
            provider: SeedProvider {
                type_: "aws".to_string(),
                region: "eu-west-1".to_string(),
            },
            backup: Some(SeedBackup {
                provider: "aws".to_string(),
                region: None,
                secret_ref: SecretReference {
                    name: BACKUP_SECRET.to_string(),
                    namespace: None,
                },
            }),
            secret_ref: Some(SecretReference {
                name: SEED_KUBECONFIG_SECRET.to_string(),
                namespace: None,
            }),
            ..Default::default()
        },
        ..Default::default()
    };
    template
        .metadata
        .labels
        .insert("environment".to_string(), "test".to_string());
    template
}

fn managed_seed(spec: ManagedSeedSpec) -> ManagedSeed {
    let mut managed_seed = ManagedSeed::new(MANAGED_SEED, spec);
    managed_seed.metadata.namespace = Some(GARDEN_NS.to_string());
    managed_seed.metadata.generation = Some(1);
    managed_seed
}

pub fn template_managed_seed() -> ManagedSeed {
    managed_seed(ManagedSeedSpec {
        shoot: Some(ShootReference {
            name: SHOOT.to_string(),
        }),
        seed_template: Some(seed_template()),
        gardenlet: None,
    })
}

pub fn gardenlet_managed_seed() -> ManagedSeed {
    managed_seed(ManagedSeedSpec {
        shoot: Some(ShootReference {
            name: SHOOT.to_string(),
        }),
        seed_template: None,
        gardenlet: Some(Gardenlet {
            config: Some(GardenletConfiguration {
                seed_config: Some(seed_template()),
                ..Default::default()
            }),
            ..Default::default()
        }),
    })
}

/// Store `managed_seed` in the garden and read it back with uid and
/// resource version set
pub fn stored(landscape: &Landscape, managed_seed: &ManagedSeed) -> ManagedSeed {
    landscape.garden.insert(managed_seed);
    read_managed_seed(landscape).expect("managed seed stored")
}

pub fn read_managed_seed(landscape: &Landscape) -> Option<ManagedSeed> {
    landscape
        .garden
        .object::<ManagedSeed>(Some(GARDEN_NS), MANAGED_SEED)
}
