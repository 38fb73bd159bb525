//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use vault_unseal_controller::prelude::*;
//! ```

pub use crate::crd::*;

// Collaborator traits - implement these to run the engine against other backends
pub use crate::controller::keys::SecretStore;
pub use crate::controller::reconciler::PolicyStore;
pub use crate::controller::targets::TargetLister;
pub use crate::controller::unseal::{UnsealApi, UnsealConnector};
pub use crate::observability::MetricsSink;

pub use crate::controller::keys::{load_keys, KeyLoadError, KeyMaterial};
pub use crate::controller::reconciler::{PassError, PolicyId, Reconciler, ReconcilerError, Requeue};
pub use crate::controller::selector::{LabelSelector, SelectorError};
pub use crate::controller::targets::Target;
pub use crate::controller::unseal::{derive_endpoint, unseal_target, SealState, UnsealError};

pub use crate::config::ControllerConfig;
