//! # CRD Generator
//!
//! Generates the `UnsealPolicy` CustomResourceDefinition YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/unsealpolicy.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;
use vault_unseal_controller::crd::UnsealPolicy;

fn main() {
    let crd = UnsealPolicy::crd();

    match serde_yaml::to_string(&crd) {
        Ok(yaml) => {
            print!("{yaml}");
        }
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
