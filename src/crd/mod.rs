//! Custom Resource Definitions consumed and produced by the ManagedSeed operator

mod condition;
mod gardenlet;
mod managed_seed;
mod managed_seed_set;
mod secret_binding;
mod seed;
mod shoot;

pub use condition::*;
pub use gardenlet::*;
pub use managed_seed::*;
pub use managed_seed_set::*;
pub use secret_binding::*;
pub use seed::*;
pub use shoot::*;

use kube::CustomResourceExt;

/// Label marking objects by their role in the landscape
pub const LABEL_GARDEN_ROLE: &str = "gardener.cloud/role";
/// Role value of seed objects
pub const GARDEN_ROLE_SEED: &str = "seed";

/// Generate CRD YAML manifests for all custom resources
pub fn generate_crds() -> crate::Result<Vec<String>> {
    Ok(vec![
        serde_yaml::to_string(&ManagedSeed::crd())?,
        serde_yaml::to_string(&ManagedSeedSet::crd())?,
        serde_yaml::to_string(&Seed::crd())?,
        serde_yaml::to_string(&Shoot::crd())?,
    ])
}
