//! Vault Unseal Controller Library
//!
//! A Kubernetes controller that keeps HashiCorp Vault pods unsealed.
//!
//! ## Overview
//!
//! For every `UnsealPolicy` resource the controller:
//!
//! 1. **Discovers targets** - Lists the Vault pods matching the policy's label selector
//! 2. **Loads key shares** - Reads unseal keys from one or more Kubernetes Secrets
//! 3. **Unseals** - Checks each ready pod's seal status and submits keys until it unseals
//! 4. **Reports** - Records the outcome as status conditions and Prometheus metrics
//!
//! ## Quick Start
//!
//! ```rust
//! use vault_unseal_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
