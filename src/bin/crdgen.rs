//! CRD YAML Generator
//!
//! This binary generates Kubernetes CRD manifests for all custom resources
//! known to the managed-seed-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use managed_seed_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
