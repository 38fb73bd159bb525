//! # Controller
//!
//! Core controller modules for the Vault Unseal Controller.
//!
//! - `backoff`: Exponential backoff for failed passes
//! - `cluster`: Kubernetes implementations of the collaborator traits
//! - `keys`: Key loading from Kubernetes Secrets
//! - `reconciler`: Core reconciliation logic
//! - `selector`: Label selector parsing and matching
//! - `targets`: Vault pod discovery
//! - `unseal`: Unseal protocol and endpoint derivation
//! - `vault`: Vault HTTP client

pub mod backoff;
pub mod cluster;
pub mod keys;
pub mod reconciler;
pub mod selector;
pub mod targets;
pub mod unseal;
pub mod vault;
