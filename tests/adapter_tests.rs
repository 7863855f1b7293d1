//! Tests for the garden-facing adapters: bootstrap credentials, chart loading
//! and rendering, gardenlet values and role secret lookups

mod common;

use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use managed_seed_operator::adapters::bootstrap::{
    bootstrap_token_secret_name, service_account_name, token_id, BootstrapMinter,
    GardenCredentials, BOOTSTRAP_TOKEN_NAMESPACE, GARDENLET_KUBECONFIG_SECRET,
};
use managed_seed_operator::adapters::chart::{GardenletChart, IMAGES_FILE, VALUES_FILE};
use managed_seed_operator::adapters::gardenlet_values::{ValuesHelper, KUBERNETES_SERVICE_HOST};
use managed_seed_operator::adapters::secrets::{
    get_internal_domain, read_garden_role_secrets, Domain, ANNOTATION_DNS_DOMAIN,
    ANNOTATION_DNS_PROVIDER, ANNOTATION_DNS_ZONE, GARDEN_ROLE_INTERNAL_DOMAIN,
};
use managed_seed_operator::clients::InMemoryCluster;
use managed_seed_operator::config::GardenAccess;
use managed_seed_operator::crd::{
    Bootstrap, GardenClientConnection, GardenletConfiguration, GardenletDeployment, ShootDns,
    LABEL_GARDEN_ROLE,
};
use managed_seed_operator::Error;

use common::*;

// =============================================================================
// Test Helpers
// =============================================================================

fn shoot_with_domain(domain: &str) -> managed_seed_operator::crd::Shoot {
    let mut shoot = settled_shoot();
    shoot.spec.dns = Some(ShootDns {
        domain: Some(domain.to_string()),
    });
    shoot
}

fn parent_deployment() -> GardenletDeployment {
    GardenletDeployment {
        replica_count: Some(2),
        service_account_name: Some("gardenlet".to_string()),
        ..Default::default()
    }
}

fn parent_config() -> GardenletConfiguration {
    GardenletConfiguration {
        garden_client_connection: Some(GardenClientConnection {
            kubeconfig: Some("parent-kubeconfig".to_string()),
            kubeconfig_secret: Some(managed_seed_operator::crd::SecretReference::new(
                "parent-secret",
                "garden",
            )),
            qps: Some(100.0),
            ..Default::default()
        }),
        log_level: Some("info".to_string()),
        seed_config: Some(seed_template()),
        ..Default::default()
    }
}

fn values_helper() -> ValuesHelper {
    ValuesHelper::new(parent_deployment(), parent_config(), image_vector(), GARDEN_NS)
}

fn role_secret(role: &str, annotations: &[(&str, &str)]) -> Secret {
    let mut secret = secret(GARDEN_NS, &format!("{}-secret", role), &[]);
    secret.metadata.labels = Some(BTreeMap::from([(
        LABEL_GARDEN_ROLE.to_string(),
        role.to_string(),
    )]));
    secret.metadata.annotations = Some(
        annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    secret
}

fn token_secret_value(cluster: &InMemoryCluster, name: &str, key: &str) -> Option<String> {
    let secret = cluster.object::<Secret>(Some(BOOTSTRAP_TOKEN_NAMESPACE), name)?;
    let value = secret.data?.get(key)?.0.clone();
    String::from_utf8(value).ok()
}

fn write(dir: &std::path::Path, file: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(file);
    std::fs::write(&path, contents).unwrap();
    path
}

// =============================================================================
// Bootstrap Credentials
// =============================================================================

#[test]
fn test_token_id_is_stable_hex() {
    let id = token_id("garden", "ms-1");

    assert_eq!(id.len(), 6);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert_eq!(id, token_id("garden", "ms-1"));
    assert_ne!(id, token_id("garden", "ms-2"));
    assert_eq!(bootstrap_token_secret_name(&id), format!("bootstrap-token-{}", id));
}

#[tokio::test]
async fn test_bootstrap_token_is_minted_once_and_reused() {
    let garden = InMemoryCluster::new();
    let shoot = InMemoryCluster::new();
    let handle = garden.handle();
    let access = garden_access();
    let minter = BootstrapMinter::new(&handle, &access, Duration::from_secs(3600));
    let managed_seed = gardenlet_managed_seed();

    let first = assert_ok!(minter.bootstrap_token(&shoot.handle(), &managed_seed).await);
    let second = assert_ok!(minter.bootstrap_token(&shoot.handle(), &managed_seed).await);

    let id = token_id(GARDEN_NS, MANAGED_SEED);
    assert_eq!(first, second);
    assert!(first.starts_with(&format!("{}.", id)));

    let name = bootstrap_token_secret_name(&id);
    assert_eq!(token_secret_value(&shoot, &name, "token-id").as_deref(), Some(id.as_str()));
    let secret = shoot
        .object::<Secret>(Some(BOOTSTRAP_TOKEN_NAMESPACE), &name)
        .unwrap();
    assert_eq!(secret.type_.as_deref(), Some("bootstrap.kubernetes.io/token"));
    assert_eq!(shoot.objects::<Secret>().len(), 1);
    assert!(garden.objects::<Secret>().is_empty());
}

#[tokio::test]
async fn test_expired_bootstrap_token_is_rotated() {
    let garden = InMemoryCluster::new();
    let shoot = InMemoryCluster::new();
    let id = token_id(GARDEN_NS, MANAGED_SEED);
    let name = bootstrap_token_secret_name(&id);
    let expired = (Utc::now() - ChronoDuration::hours(1)).to_rfc3339_opts(SecondsFormat::Secs, true);
    shoot.insert(&secret(
        BOOTSTRAP_TOKEN_NAMESPACE,
        &name,
        &[("token-id", id.as_str()), ("token-secret", "stale"), ("expiration", expired.as_str())],
    ));

    let handle = garden.handle();
    let access = garden_access();
    let minter = BootstrapMinter::new(&handle, &access, Duration::from_secs(3600));
    let token = minter
        .bootstrap_token(&shoot.handle(), &gardenlet_managed_seed())
        .await
        .unwrap();

    assert_ne!(token, format!("{}.stale", id));
    let stored = token_secret_value(&shoot, &name, "token-secret").unwrap();
    assert_eq!(token, format!("{}.{}", id, stored));
    let expiration = token_secret_value(&shoot, &name, "expiration").unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(&expiration).unwrap() > Utc::now());
}

#[tokio::test]
async fn test_existing_garden_kubeconfig_skips_bootstrap() {
    let garden = InMemoryCluster::new();
    let shoot = InMemoryCluster::new();
    shoot.insert(&secret(GARDEN_NS, GARDENLET_KUBECONFIG_SECRET, &[("kubeconfig", "durable")]));

    let handle = garden.handle();
    let access = garden_access();
    let minter = BootstrapMinter::new(&handle, &access, Duration::from_secs(3600));
    let credentials = minter
        .prepare_garden_client_connection(
            &shoot.handle(),
            GARDEN_NS,
            &gardenlet_managed_seed(),
            Bootstrap::BootstrapToken,
            true,
        )
        .await
        .unwrap();

    assert_eq!(credentials, GardenCredentials::Bootstrap(None));
    assert!(garden.objects::<Secret>().is_empty());
    assert_eq!(shoot.objects::<Secret>().len(), 1);
}

#[tokio::test]
async fn test_bootstrap_none_hands_out_garden_kubeconfig() {
    let garden = InMemoryCluster::new();
    let shoot = InMemoryCluster::new();
    let handle = garden.handle();

    let access = garden_access();
    let minter = BootstrapMinter::new(&handle, &access, Duration::from_secs(3600));
    let credentials = minter
        .prepare_garden_client_connection(
            &shoot.handle(),
            GARDEN_NS,
            &gardenlet_managed_seed(),
            Bootstrap::None,
            true,
        )
        .await
        .unwrap();
    assert_eq!(
        credentials,
        GardenCredentials::Kubeconfig("apiVersion: v1\nkind: Config\n".to_string())
    );

    let without_kubeconfig = GardenAccess {
        kubeconfig: None,
        ..garden_access()
    };
    let minter = BootstrapMinter::new(&handle, &without_kubeconfig, Duration::from_secs(3600));
    let err = minter
        .prepare_garden_client_connection(
            &shoot.handle(),
            GARDEN_NS,
            &gardenlet_managed_seed(),
            Bootstrap::None,
            true,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConfigError(_)));
}

#[tokio::test]
async fn test_render_kubeconfig_points_at_garden() {
    let garden = InMemoryCluster::new();
    let handle = garden.handle();
    let access = GardenAccess {
        ca_bundle: Some("-----BEGIN CERTIFICATE-----".to_string()),
        ..garden_access()
    };
    let minter = BootstrapMinter::new(&handle, &access, Duration::from_secs(3600));

    let rendered: Value = serde_yaml::from_str(&minter.render_kubeconfig("abc123.secret").unwrap()).unwrap();
    assert_eq!(rendered["clusters"][0]["cluster"]["server"], json!(GARDEN_SERVER));
    assert!(rendered["clusters"][0]["cluster"]["certificate-authority-data"].is_string());
    assert_eq!(rendered["users"][0]["user"]["token"], json!("abc123.secret"));

    let no_server = GardenAccess::default();
    let minter = BootstrapMinter::new(&handle, &no_server, Duration::from_secs(3600));
    assert!(matches!(
        minter.render_kubeconfig("abc123.secret"),
        Err(Error::ConfigError(_))
    ));
}

#[tokio::test]
async fn test_service_account_bootstrap_and_cleanup() {
    let garden = InMemoryCluster::new();
    let shoot = InMemoryCluster::new();
    let sa_name = service_account_name(MANAGED_SEED);
    garden.insert(&secret(
        GARDEN_NS,
        &format!("{}-token", sa_name),
        &[("token", "sa-token")],
    ));

    let handle = garden.handle();
    let access = garden_access();
    let minter = BootstrapMinter::new(&handle, &access, Duration::from_secs(3600));
    let managed_seed = gardenlet_managed_seed();

    assert_eq!(
        minter.service_account_token(&managed_seed).await.unwrap(),
        "sa-token"
    );
    assert!(garden.contains::<ServiceAccount>(Some(GARDEN_NS), &sa_name));
    assert_eq!(garden.objects::<ClusterRoleBinding>().len(), 1);

    minter.bootstrap_token(&shoot.handle(), &managed_seed).await.unwrap();
    assert_eq!(shoot.objects::<Secret>().len(), 1);
    minter.cleanup(&shoot.handle(), &managed_seed).await.unwrap();

    assert!(shoot.objects::<Secret>().is_empty());
    assert!(garden.objects::<Secret>().is_empty());
    assert!(garden.objects::<ServiceAccount>().is_empty());
    assert!(garden.objects::<ClusterRoleBinding>().is_empty());
}

#[tokio::test]
async fn test_service_account_token_not_yet_populated() {
    let garden = InMemoryCluster::new();
    let handle = garden.handle();
    let access = garden_access();
    let minter = BootstrapMinter::new(&handle, &access, Duration::from_secs(3600));

    let err = assert_err!(minter.service_account_token(&gardenlet_managed_seed()).await);
    assert!(err.is_transient());
}

// =============================================================================
// Gardenlet Values
// =============================================================================

#[test]
fn test_merge_deployment_with_parent() {
    let overrides = GardenletDeployment {
        revision_history_limit: Some(3),
        ..Default::default()
    };
    let deployment = values_helper()
        .merge_deployment(Some(&overrides), true, &shoot_with_domain("shoot-1.example.org"))
        .unwrap();

    assert_eq!(deployment.replica_count, Some(2));
    assert_eq!(deployment.revision_history_limit, Some(3));
    let image = deployment.image.clone().unwrap();
    assert_eq!(
        image.repository.as_deref(),
        Some("eu.gcr.io/gardener-project/gardener/gardenlet")
    );
    assert_eq!(image.tag.as_deref(), Some("v1.80.0"));
    assert_eq!(
        deployment
            .env_value(KUBERNETES_SERVICE_HOST)
            .and_then(|e| e.value.as_deref()),
        Some("api.shoot-1.example.org")
    );
}

#[test]
fn test_merge_deployment_without_parent() {
    let deployment = values_helper()
        .merge_deployment(None, false, &settled_shoot())
        .unwrap();

    assert_eq!(deployment.replica_count, None);
    assert!(deployment.image.is_some());
    assert!(deployment.env_value(KUBERNETES_SERVICE_HOST).is_none());
}

#[test]
fn test_merge_configuration_drops_parent_connection_and_seed() {
    let overrides = GardenletConfiguration {
        log_level: Some("debug".to_string()),
        ..Default::default()
    };
    let config = values_helper()
        .merge_configuration(Some(&overrides), true)
        .unwrap();

    let connection = config.garden_client_connection.clone().unwrap();
    assert!(connection.kubeconfig.is_none());
    assert!(connection.kubeconfig_secret.is_none());
    assert_eq!(connection.qps, Some(100.0));
    assert!(config.seed_config.is_none());
    assert_eq!(config.log_level.as_deref(), Some("debug"));
    assert_eq!(
        config.api_version.as_deref(),
        Some("gardenlet.config.gardener.cloud/v1alpha1")
    );
    assert_eq!(config.kind.as_deref(), Some("GardenletConfiguration"));
}

#[test]
fn test_chart_values_for_bootstrap() {
    let helper = values_helper();
    let managed_seed = gardenlet_managed_seed();
    let deployment = helper.merge_deployment(None, true, &settled_shoot()).unwrap();
    let config = helper.merge_configuration(None, true).unwrap();

    let values = helper
        .chart_values(
            &managed_seed,
            &seed_template(),
            &deployment,
            &config,
            &GardenCredentials::Bootstrap(Some("bootstrap-kubeconfig".to_string())),
        )
        .unwrap();

    let gardenlet = &values["gardenlet"];
    assert_eq!(gardenlet["replicaCount"], json!(2));
    assert_eq!(
        gardenlet["bootstrapKubeconfig"]["kubeconfig"],
        json!("bootstrap-kubeconfig")
    );
    let connection = &gardenlet["config"]["gardenClientConnection"];
    assert_eq!(connection["kubeconfigSecret"]["name"], json!("gardenlet-kubeconfig"));
    assert_eq!(connection["kubeconfigSecret"]["namespace"], json!(GARDEN_NS));
    assert_eq!(
        connection["bootstrapKubeconfig"]["name"],
        json!("gardenlet-kubeconfig-bootstrap")
    );
    let seed_config = &gardenlet["config"]["seedConfig"];
    assert_eq!(seed_config["metadata"]["name"], json!(MANAGED_SEED));
    assert_eq!(seed_config["metadata"]["labels"]["environment"], json!("test"));
    assert_eq!(seed_config["spec"]["provider"]["type"], json!("aws"));
}

#[test]
fn test_chart_values_for_raw_kubeconfig() {
    let helper = values_helper();
    let deployment = helper.merge_deployment(None, true, &settled_shoot()).unwrap();
    let config = helper.merge_configuration(None, true).unwrap();

    let values = helper
        .chart_values(
            &gardenlet_managed_seed(),
            &seed_template(),
            &deployment,
            &config,
            &GardenCredentials::Kubeconfig("garden-kubeconfig".to_string()),
        )
        .unwrap();

    let gardenlet = &values["gardenlet"];
    assert!(gardenlet.get("bootstrapKubeconfig").is_none());
    let connection = &gardenlet["config"]["gardenClientConnection"];
    assert_eq!(connection["kubeconfig"], json!("garden-kubeconfig"));
    assert!(connection.get("kubeconfigSecret").is_none());
}

// =============================================================================
// Gardenlet Chart
// =============================================================================

#[test]
fn test_chart_load_with_image_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        VALUES_FILE,
        "gardenlet:\n  replicaCount: 3\n  config:\n    logLevel: info\n",
    );
    write(
        dir.path(),
        IMAGES_FILE,
        "images:\n- name: gardenlet\n  repository: eu.gcr.io/gardener-project/gardener/gardenlet\n  tag: v1.80.0\n",
    );
    let overwrite = write(
        dir.path(),
        "overwrite.yaml",
        "images:\n- name: gardenlet\n  repository: registry.local/gardenlet\n  tag: dev\n",
    );

    let chart = GardenletChart::load(dir.path(), Some(&overwrite)).unwrap();
    let helper = chart.values_helper(GARDEN_NS, None).unwrap();

    let deployment = helper.merge_deployment(None, true, &settled_shoot()).unwrap();
    assert_eq!(deployment.replica_count, Some(3));
    let image = deployment.image.unwrap();
    assert_eq!(image.repository.as_deref(), Some("registry.local/gardenlet"));
    assert_eq!(image.tag.as_deref(), Some("dev"));

    let config = helper.merge_configuration(None, true).unwrap();
    assert_eq!(config.log_level.as_deref(), Some("info"));
}

#[test]
fn test_chart_load_from_empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    let chart = GardenletChart::load(dir.path(), None).unwrap();
    let helper = chart.values_helper(GARDEN_NS, None).unwrap();

    let err = helper
        .merge_deployment(None, true, &settled_shoot())
        .unwrap_err();
    assert!(matches!(err, Error::ConfigError(msg) if msg.contains("gardenlet")));
}

#[test]
fn test_chart_renders_manifests_in_apply_order() {
    let chart = GardenletChart::new(json!({}), image_vector());
    let helper = chart.values_helper(GARDEN_NS, None).unwrap();
    let overrides = GardenletDeployment {
        vpa: Some(true),
        ..Default::default()
    };
    let deployment = helper
        .merge_deployment(Some(&overrides), true, &settled_shoot())
        .unwrap();
    let config = helper.merge_configuration(None, true).unwrap();
    let values = helper
        .chart_values(
            &gardenlet_managed_seed(),
            &seed_template(),
            &deployment,
            &config,
            &GardenCredentials::Bootstrap(Some("bootstrap-kubeconfig".to_string())),
        )
        .unwrap();

    let manifests = chart.render(GARDEN_NS, &values).unwrap();
    let kinds: Vec<&str> = manifests.iter().map(|m| m.resource.kind.as_str()).collect();
    assert_eq!(
        kinds,
        vec![
            "ServiceAccount",
            "ClusterRoleBinding",
            "Secret",
            "ConfigMap",
            "Service",
            "Deployment",
            "VerticalPodAutoscaler",
        ]
    );

    let deployment = manifests
        .iter()
        .find(|m| m.resource.kind == "Deployment")
        .unwrap();
    assert_eq!(deployment.body["kind"], json!("Deployment"));
    assert_eq!(
        deployment.body["spec"]["template"]["spec"]["containers"][0]["image"],
        json!("eu.gcr.io/gardener-project/gardener/gardenlet:v1.80.0")
    );
}

#[test]
fn test_chart_render_requires_gardenlet_values() {
    let chart = GardenletChart::new(json!({}), image_vector());
    assert!(matches!(
        chart.render(GARDEN_NS, &json!({})),
        Err(Error::ValidationError(_))
    ));
}

// =============================================================================
// Garden Role Secrets
// =============================================================================

#[tokio::test]
async fn test_internal_domain_from_role_secrets() {
    let garden = InMemoryCluster::new();
    garden.insert(&role_secret(
        GARDEN_ROLE_INTERNAL_DOMAIN,
        &[
            (ANNOTATION_DNS_DOMAIN, "internal.example.org"),
            (ANNOTATION_DNS_PROVIDER, "aws-route53"),
            (ANNOTATION_DNS_ZONE, "Z123"),
        ],
    ));
    garden.insert(&role_secret("alerting", &[]));
    garden.insert(&secret(GARDEN_NS, "unlabelled", &[]));

    let secrets = read_garden_role_secrets(&garden.handle(), GARDEN_NS)
        .await
        .unwrap();
    assert_eq!(secrets.len(), 2);

    assert_eq!(
        get_internal_domain(&secrets).unwrap(),
        Some(Domain {
            domain: "internal.example.org".to_string(),
            provider: "aws-route53".to_string(),
            zone: Some("Z123".to_string()),
        })
    );
}

#[test]
fn test_internal_domain_edge_cases() {
    assert_eq!(get_internal_domain(&BTreeMap::new()).unwrap(), None);

    let only_alerting = BTreeMap::from([("alerting".to_string(), role_secret("alerting", &[]))]);
    assert!(matches!(
        get_internal_domain(&only_alerting),
        Err(Error::ConfigError(_))
    ));

    let incomplete = BTreeMap::from([(
        GARDEN_ROLE_INTERNAL_DOMAIN.to_string(),
        role_secret(
            GARDEN_ROLE_INTERNAL_DOMAIN,
            &[(ANNOTATION_DNS_DOMAIN, "internal.example.org")],
        ),
    )]);
    assert!(matches!(
        get_internal_domain(&incomplete),
        Err(Error::ConfigError(msg)) if msg.contains(ANNOTATION_DNS_PROVIDER)
    ));
}
