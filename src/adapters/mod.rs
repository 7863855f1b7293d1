//! Adapters between ManagedSeeds and the objects they produce in the garden and
//! shoot clusters

pub mod bootstrap;
pub mod chart;
pub mod deployment_builder;
pub mod gardenlet_values;
pub mod image_vector;
pub mod secrets;
pub mod seed_secrets;
pub mod service_builder;
