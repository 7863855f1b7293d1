//! Step-ordered reconcile and delete of a ManagedSeed
//!
//! Every step re-reads the clusters it depends on, so both operations resume
//! where they left off after a restart. Neither operation keeps state between
//! calls.

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::bootstrap::{BootstrapMinter, GardenCredentials, GARDENLET_KUBECONFIG_SECRET};
use crate::adapters::chart::{gardenlet_deployed, ChartApplier};
use crate::adapters::gardenlet_values::ValuesHelper;
use crate::adapters::seed_secrets::{delete_seed_secrets, ensure_seed_secrets, SeedSecretRefs};
use crate::clients::{ClientRegistry, ClusterHandle};
use crate::config::GardenAccess;
use crate::crd::{
    set_condition, Bootstrap, Gardenlet, ManagedSeed, ManagedSeedStatus, RegistrationMode, Seed,
    SeedTemplate, Shoot, ANNOTATION_OPERATION, CONDITION_FALSE, CONDITION_SEED_REGISTERED,
    CONDITION_SHOOT_RECONCILED, CONDITION_TRUE, GARDEN_ROLE_SEED, LABEL_GARDEN_ROLE,
    OPERATION_RENEW_KUBECONFIG,
};
use crate::events::{actions, object_reference, reasons, EventPublisher, EventType};
use crate::json::create_merge_patch;
use crate::{Error, Result};

/// Deployment whose presence in the shoot's control plane namespace collides
/// with a seed-managed vertical pod autoscaler
pub const VPA_ADMISSION_CONTROLLER: &str = "vpa-admission-controller";

/// Condition reasons
pub const REASON_RECONCILING: &str = "Reconciling";
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";
pub const REASON_SHOOT_RECONCILED: &str = "ShootReconciled";
pub const REASON_SEED_REGISTERED: &str = "SeedRegistered";
pub const REASON_GARDENLET_DEPLOYED: &str = "GardenletDeployed";
pub const REASON_DELETING: &str = "Deleting";
pub const REASON_DELETED: &str = "Deleted";
pub const REASON_DELETE_ERROR: &str = "DeleteError";

/// Result of one actuator call
#[derive(Debug)]
pub struct Outcome {
    pub status: ManagedSeedStatus,
    /// Nothing left to do until the observed objects change
    pub wait: bool,
    pub remove_finalizer: bool,
    pub error: Option<Error>,
}

impl Outcome {
    fn ok(status: ManagedSeedStatus, wait: bool, remove_finalizer: bool) -> Self {
        Self {
            status,
            wait,
            remove_finalizer,
            error: None,
        }
    }
}

/// Step of a delete that stops the current pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DeleteProgress {
    Wait,
    Requeue,
    Done,
}

/// Reconciles and deletes ManagedSeeds
pub struct Actuator {
    registry: Arc<ClientRegistry>,
    chart: Arc<dyn ChartApplier>,
    values: ValuesHelper,
    events: Arc<dyn EventPublisher>,
    garden_access: GardenAccess,
    bootstrap_token_validity: Duration,
}

impl Actuator {
    pub fn new(
        registry: Arc<ClientRegistry>,
        chart: Arc<dyn ChartApplier>,
        values: ValuesHelper,
        events: Arc<dyn EventPublisher>,
        garden_access: GardenAccess,
        bootstrap_token_validity: Duration,
    ) -> Self {
        Self {
            registry,
            chart,
            values,
            events,
            garden_access,
            bootstrap_token_validity,
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    fn garden(&self) -> &ClusterHandle {
        self.registry.garden()
    }

    /// Namespace hosting the gardenlet inside the shoot
    fn shoot_garden_namespace(&self) -> &str {
        self.values.garden_namespace()
    }

    fn minter(&self) -> BootstrapMinter<'_> {
        BootstrapMinter::new(self.garden(), &self.garden_access, self.bootstrap_token_validity)
    }

    /// Bring the shoot, its gardenlet and the Seed in line with `managed_seed`
    #[instrument(skip_all, fields(name = %managed_seed.name_any(), namespace = managed_seed.namespace().unwrap_or_default()))]
    pub async fn reconcile(&self, managed_seed: &ManagedSeed, cancel: &CancellationToken) -> Outcome {
        let mut status = managed_seed.status.clone().unwrap_or_default();
        status.observed_generation = managed_seed.metadata.generation;
        let reference = object_reference(managed_seed);

        self.events
            .publish(&reference, EventType::Normal, reasons::RECONCILING, actions::RECONCILE, None)
            .await;

        match self.reconcile_steps(managed_seed, &mut status, cancel).await {
            Ok(wait) => {
                if !wait {
                    self.events
                        .publish(
                            &reference,
                            EventType::Normal,
                            reasons::RECONCILED,
                            actions::RECONCILE,
                            Some("ManagedSeed has been reconciled".to_string()),
                        )
                        .await;
                }
                Outcome::ok(status, wait, false)
            }
            Err(error) => {
                set_condition(
                    &mut status.conditions,
                    CONDITION_SHOOT_RECONCILED,
                    CONDITION_FALSE,
                    REASON_RECONCILE_ERROR,
                    error.to_string(),
                );
                self.events
                    .publish(
                        &reference,
                        EventType::Warning,
                        reasons::RECONCILE_ERROR,
                        actions::RECONCILE,
                        Some(error.to_string()),
                    )
                    .await;
                Outcome {
                    status,
                    wait: false,
                    remove_finalizer: false,
                    error: Some(error),
                }
            }
        }
    }

    async fn reconcile_steps(
        &self,
        managed_seed: &ManagedSeed,
        status: &mut ManagedSeedStatus,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let namespace = managed_seed.namespace().unwrap_or_default();
        let name = managed_seed.name_any();
        let shoot_name = managed_seed.shoot_name()?;
        let mode = managed_seed.registration_mode()?;
        let template = managed_seed.seed_template()?;

        let shoot = self
            .garden()
            .get_required::<Shoot>(Some(&namespace), shoot_name)
            .await?;

        if !shoot.is_settled() {
            info!("Shoot {}/{} is not reconciled yet", namespace, shoot_name);
            set_condition(
                &mut status.conditions,
                CONDITION_SHOOT_RECONCILED,
                CONDITION_FALSE,
                REASON_RECONCILING,
                "Waiting for shoot to be reconciled",
            );
            return Ok(true);
        }
        if cancel.is_cancelled() {
            return Ok(true);
        }

        let shoot_client = self.registry.shoot(&shoot).await?;
        let seed = self.garden().get::<Seed>(None, &name).await?;
        let mut already_bootstrapped_check = seed.is_some();

        if managed_seed.operation() == Some(OPERATION_RENEW_KUBECONFIG) {
            info!("Renewing garden kubeconfig of gardenlet for {}/{}", namespace, name);
            self.delete_gardenlet_kubeconfig(&shoot_client).await?;
            self.remove_operation_annotation(managed_seed).await?;
            already_bootstrapped_check = false;
        }

        if let Some(seed) = &seed {
            if seed.client_certificate_expired(Utc::now()) {
                info!("Client certificate of seed {} expired, re-bootstrapping", name);
                self.delete_gardenlet_kubeconfig(&shoot_client).await?;
                already_bootstrapped_check = false;
            }
        }
        if cancel.is_cancelled() {
            return Ok(true);
        }

        self.validate_seed_spec(template, &shoot).await?;

        self.ensure_garden_namespace(&shoot_client).await?;
        if cancel.is_cancelled() {
            return Ok(true);
        }

        let shoot_kubeconfig = self.registry.shoot_kubeconfig(&shoot).await?;
        ensure_seed_secrets(self.garden(), managed_seed, &shoot, template, &shoot_kubeconfig).await?;
        if cancel.is_cancelled() {
            return Ok(true);
        }

        match mode {
            RegistrationMode::SeedTemplate(template) => {
                self.register_seed(managed_seed, template, seed.as_ref()).await?;
                set_condition(
                    &mut status.conditions,
                    CONDITION_SEED_REGISTERED,
                    CONDITION_TRUE,
                    REASON_SEED_REGISTERED,
                    "Seed has been registered",
                );
            }
            RegistrationMode::Gardenlet(gardenlet) => {
                let values = self
                    .gardenlet_values(
                        managed_seed,
                        gardenlet,
                        template,
                        &shoot,
                        &shoot_client,
                        already_bootstrapped_check,
                    )
                    .await?;
                self.chart
                    .apply(&shoot_client, self.shoot_garden_namespace(), &values)
                    .await?;
                set_condition(
                    &mut status.conditions,
                    CONDITION_SEED_REGISTERED,
                    CONDITION_TRUE,
                    REASON_GARDENLET_DEPLOYED,
                    "Gardenlet has been deployed and registers the seed",
                );
            }
        }

        set_condition(
            &mut status.conditions,
            CONDITION_SHOOT_RECONCILED,
            CONDITION_TRUE,
            REASON_SHOOT_RECONCILED,
            "Shoot has been reconciled",
        );
        Ok(false)
    }

    async fn delete_gardenlet_kubeconfig(&self, shoot_client: &ClusterHandle) -> Result<()> {
        if shoot_client
            .delete::<Secret>(Some(self.shoot_garden_namespace()), GARDENLET_KUBECONFIG_SECRET)
            .await?
        {
            info!("Deleted secret {}", GARDENLET_KUBECONFIG_SECRET);
        }
        Ok(())
    }

    /// Drop the operation annotation with a merge patch computed from a copy
    async fn remove_operation_annotation(&self, managed_seed: &ManagedSeed) -> Result<()> {
        let mut updated = managed_seed.clone();
        if let Some(annotations) = updated.metadata.annotations.as_mut() {
            annotations.remove(ANNOTATION_OPERATION);
            if annotations.is_empty() {
                updated.metadata.annotations = None;
            }
        }
        let patch = create_merge_patch(
            &serde_json::to_value(managed_seed)?,
            &serde_json::to_value(&updated)?,
        );
        self.garden()
            .patch::<ManagedSeed>(managed_seed.namespace().as_deref(), &managed_seed.name_any(), &patch)
            .await?;
        Ok(())
    }

    /// Reject promotions whose seed autoscaler would collide with one the
    /// shoot already runs
    async fn validate_seed_spec(&self, template: &SeedTemplate, shoot: &Shoot) -> Result<()> {
        if !template.spec.vertical_pod_autoscaler_enabled() {
            return Ok(());
        }

        let shoot_vpa = shoot
            .spec
            .kubernetes
            .vertical_pod_autoscaler
            .as_ref()
            .is_some_and(|vpa| vpa.enabled);
        if shoot_vpa {
            return Err(Error::ValidationError(
                "seed VPA is enabled but shoot already has a VPA enabled".to_string(),
            ));
        }

        if let Some(technical_id) = shoot.technical_id() {
            if self
                .registry
                .seed()
                .exists::<Deployment>(Some(technical_id), VPA_ADMISSION_CONTROLLER)
                .await?
            {
                return Err(Error::ValidationError(format!(
                    "seed VPA is enabled but shoot control plane {} still runs {}",
                    technical_id, VPA_ADMISSION_CONTROLLER
                )));
            }
        }
        Ok(())
    }

    async fn ensure_garden_namespace(&self, shoot_client: &ClusterHandle) -> Result<()> {
        let name = self.shoot_garden_namespace();
        if shoot_client.exists::<Namespace>(None, name).await? {
            return Ok(());
        }
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match shoot_client.create(&namespace).await {
            Ok(_) => {
                info!("Created namespace {} in shoot", name);
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Create or update the Seed described by the template
    async fn register_seed(
        &self,
        managed_seed: &ManagedSeed,
        template: &SeedTemplate,
        existing: Option<&Seed>,
    ) -> Result<()> {
        if let Some(existing) = existing {
            ensure_controlled_by(existing, managed_seed)?;
        }
        let desired = desired_seed(managed_seed, template);
        self.garden().create_or_update(&desired).await?;
        debug!("Seed {} registered", desired.name_any());
        Ok(())
    }

    /// Merged gardenlet chart values for `managed_seed`
    async fn gardenlet_values(
        &self,
        managed_seed: &ManagedSeed,
        gardenlet: &Gardenlet,
        template: &SeedTemplate,
        shoot: &Shoot,
        shoot_client: &ClusterHandle,
        already_bootstrapped_check: bool,
    ) -> Result<serde_json::Value> {
        let deployment = self.values.merge_deployment(
            gardenlet.deployment.as_ref(),
            gardenlet.merge_with_parent(),
            shoot,
        )?;
        let config = self
            .values
            .merge_configuration(gardenlet.config.as_ref(), gardenlet.merge_with_parent())?;
        let credentials = self
            .minter()
            .prepare_garden_client_connection(
                shoot_client,
                self.shoot_garden_namespace(),
                managed_seed,
                gardenlet.bootstrap(),
                already_bootstrapped_check,
            )
            .await?;
        self.values
            .chart_values(managed_seed, template, &deployment, &config, &credentials)
    }

    /// Tear down everything `reconcile` created, one step per call
    #[instrument(skip_all, fields(name = %managed_seed.name_any(), namespace = managed_seed.namespace().unwrap_or_default()))]
    pub async fn delete(&self, managed_seed: &ManagedSeed, cancel: &CancellationToken) -> Outcome {
        let mut status = managed_seed.status.clone().unwrap_or_default();
        status.observed_generation = managed_seed.metadata.generation;
        let reference = object_reference(managed_seed);

        self.events
            .publish(&reference, EventType::Normal, reasons::DELETING, actions::DELETE, None)
            .await;

        match self.delete_steps(managed_seed, &mut status, cancel).await {
            Ok(DeleteProgress::Done) => {
                self.events
                    .publish(
                        &reference,
                        EventType::Normal,
                        reasons::DELETED,
                        actions::DELETE,
                        Some("ManagedSeed has been deleted".to_string()),
                    )
                    .await;
                Outcome::ok(status, false, true)
            }
            Ok(DeleteProgress::Wait) => Outcome::ok(status, true, false),
            Ok(DeleteProgress::Requeue) => Outcome::ok(status, false, false),
            Err(error) => {
                set_condition(
                    &mut status.conditions,
                    CONDITION_SEED_REGISTERED,
                    CONDITION_FALSE,
                    REASON_DELETE_ERROR,
                    error.to_string(),
                );
                self.events
                    .publish(
                        &reference,
                        EventType::Warning,
                        reasons::DELETE_ERROR,
                        actions::DELETE,
                        Some(error.to_string()),
                    )
                    .await;
                Outcome {
                    status,
                    wait: false,
                    remove_finalizer: false,
                    error: Some(error),
                }
            }
        }
    }

    async fn delete_steps(
        &self,
        managed_seed: &ManagedSeed,
        status: &mut ManagedSeedStatus,
        cancel: &CancellationToken,
    ) -> Result<DeleteProgress> {
        let namespace = managed_seed.namespace().unwrap_or_default();
        let name = managed_seed.name_any();

        let shoot = match managed_seed.shoot_name() {
            Ok(shoot_name) => self.garden().get::<Shoot>(Some(&namespace), shoot_name).await?,
            Err(_) => None,
        };
        if shoot.is_none() {
            warn!("Shoot of ManagedSeed {}/{} not found, skipping shoot cleanup", namespace, name);
        }

        if let Some(seed) = self.garden().get::<Seed>(None, &name).await? {
            ensure_controlled_by(&seed, managed_seed)?;
            if seed.metadata.deletion_timestamp.is_none() {
                self.garden().delete::<Seed>(None, &name).await?;
                info!("Deleted seed {}", name);
            }
            set_condition(
                &mut status.conditions,
                CONDITION_SEED_REGISTERED,
                CONDITION_FALSE,
                REASON_DELETING,
                "Seed is being deleted",
            );
            return Ok(DeleteProgress::Requeue);
        }
        if cancel.is_cancelled() {
            return Ok(DeleteProgress::Wait);
        }

        let shoot_client = match &shoot {
            Some(shoot) => Some(self.registry.shoot(shoot).await?),
            None => None,
        };

        if let (Some(RegistrationMode::Gardenlet(gardenlet)), Some(shoot), Some(shoot_client)) = (
            managed_seed.registration_mode().ok(),
            shoot.as_ref(),
            shoot_client.as_ref(),
        ) {
            if gardenlet_deployed(shoot_client, self.shoot_garden_namespace()).await? {
                let values = self.teardown_values(managed_seed, gardenlet, shoot)?;
                self.chart
                    .delete(shoot_client, self.shoot_garden_namespace(), &values)
                    .await?;
                set_condition(
                    &mut status.conditions,
                    CONDITION_SEED_REGISTERED,
                    CONDITION_FALSE,
                    REASON_DELETING,
                    "Gardenlet is being deleted",
                );
                return Ok(DeleteProgress::Wait);
            }
            self.minter().cleanup(shoot_client, managed_seed).await?;
        }
        if cancel.is_cancelled() {
            return Ok(DeleteProgress::Wait);
        }

        if let Ok(template) = managed_seed.seed_template() {
            let refs = SeedSecretRefs::from_template(managed_seed, template);
            if delete_seed_secrets(self.garden(), &refs).await? {
                return Ok(DeleteProgress::Wait);
            }
        }

        if let Some(shoot_client) = &shoot_client {
            if shoot_client
                .delete::<Namespace>(None, self.shoot_garden_namespace())
                .await?
            {
                info!("Deleting namespace {} in shoot", self.shoot_garden_namespace());
                return Ok(DeleteProgress::Wait);
            }
        }
        if let Some(shoot) = &shoot {
            self.registry.forget_shoot(shoot).await;
        }

        set_condition(
            &mut status.conditions,
            CONDITION_SEED_REGISTERED,
            CONDITION_FALSE,
            REASON_DELETED,
            "Seed and gardenlet have been deleted",
        );
        Ok(DeleteProgress::Done)
    }

    /// Values rendering every object a reconcile may have applied
    fn teardown_values(
        &self,
        managed_seed: &ManagedSeed,
        gardenlet: &Gardenlet,
        shoot: &Shoot,
    ) -> Result<serde_json::Value> {
        let template = managed_seed.seed_template()?;
        let deployment = self.values.merge_deployment(
            gardenlet.deployment.as_ref(),
            gardenlet.merge_with_parent(),
            shoot,
        )?;
        let config = self
            .values
            .merge_configuration(gardenlet.config.as_ref(), gardenlet.merge_with_parent())?;
        // Deletion only needs the rendered object names; credentials are placeholders.
        let credentials = match gardenlet.bootstrap() {
            Bootstrap::None => {
                GardenCredentials::Kubeconfig(self.garden_access.kubeconfig.clone().unwrap_or_default())
            }
            _ => GardenCredentials::Bootstrap(Some(String::new())),
        };
        self.values
            .chart_values(managed_seed, template, &deployment, &config, &credentials)
    }
}

/// Seed built from the template: template labels plus the seed role label,
/// controlled by the ManagedSeed
pub fn desired_seed(managed_seed: &ManagedSeed, template: &SeedTemplate) -> Seed {
    let mut labels: BTreeMap<String, String> = template.metadata.labels.clone();
    labels.insert(LABEL_GARDEN_ROLE.to_string(), GARDEN_ROLE_SEED.to_string());

    let mut seed = Seed::new(&managed_seed.name_any(), template.spec.clone());
    seed.metadata.labels = Some(labels);
    if !template.metadata.annotations.is_empty() {
        seed.metadata.annotations = Some(template.metadata.annotations.clone());
    }
    seed.metadata.owner_references = Some(vec![managed_seed.owner_reference()]);
    seed
}

/// A Seed controlled by anything other than `managed_seed` is a fatal conflict
fn ensure_controlled_by(seed: &Seed, managed_seed: &ManagedSeed) -> Result<()> {
    let controller = seed
        .owner_references()
        .iter()
        .find(|owner| owner.controller == Some(true));
    match controller {
        Some(owner) if !managed_seed.owns(owner) => Err(Error::FatalError(format!(
            "seed {} is controlled by {} {}, not by ManagedSeed {}",
            seed.name_any(),
            owner.kind,
            owner.name,
            managed_seed.name_any()
        ))),
        _ => Ok(()),
    }
}
