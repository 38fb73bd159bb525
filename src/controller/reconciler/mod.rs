//! # Reconciler
//!
//! Reconciliation engine for `UnsealPolicy` resources.
//!
//! The engine:
//! - Manages the policy finalizer and cleans up metrics on deletion
//! - Discovers Vault pods through the policy's label selector
//! - Loads unseal key shares from Kubernetes Secrets
//! - Unseals each ready target over the Vault HTTP API
//! - Records the outcome as status conditions
//!
//! Every collaborator sits behind a trait, so the engine runs unchanged
//! against the cluster (`controller::cluster`) or in-memory fakes.

pub mod finalizer;
pub mod reconcile;
pub mod status;
pub mod types;
pub mod validation;

// Re-export public API
pub use finalizer::FinalizerState;
pub use types::{PassError, PolicyId, PolicyStore, Reconciler, ReconcilerError, Requeue};
