//! ManagedSeed Kubernetes Operator
//!
//! This operator promotes shoot clusters into seed clusters. It deploys a
//! gardenlet into the shoot or registers a Seed directly, and tears both down
//! again when the ManagedSeed is deleted.

pub mod adapters;
pub mod clients;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod events;
pub mod json;
pub mod metrics;
pub mod reconcilers;

pub use error::{Error, Result};
