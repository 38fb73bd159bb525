//! # Custom Resource Definitions
//!
//! CRD types for the Vault Unseal Controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `UnsealPolicy` specification and default values
//! - `status.rs` - Status and condition types for tracking reconciliation state

mod spec;
mod status;

// Re-export all public types
pub use spec::{
    default_ca_bundle_key, CaBundleRef, Connection, KeyRef, UnsealMode, UnsealPolicy,
    UnsealPolicySpec,
};
pub use status::{Condition, ConditionStatus, ConditionType, UnsealPolicyStatus};
