//! Reconciliation logic for ManagedSeeds, ManagedSeedSets and Shoots

pub mod actuator;
pub mod pending_replica;
pub mod shoot_status;
pub mod warnings;
