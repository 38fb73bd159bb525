//! # Finalizer Lifecycle
//!
//! ```text
//! NoFinalizer --add--> Active --deletion requested--> Terminating --cleanup--> Removed
//! ```
//!
//! Only `Active` policies run a full reconcile pass. The finalizer exists so
//! metric series can be dropped before the policy disappears.

use crate::constants::FINALIZER;
use crate::crd::UnsealPolicy;
use kube::ResourceExt;

/// Where a policy is in its finalizer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerState {
    /// Our finalizer is absent; `deleting` is true when deletion was already requested
    NoFinalizer { deleting: bool },
    /// Finalizer present, not being deleted
    Active,
    /// Finalizer present and deletion requested
    Terminating,
    /// Cleanup done and finalizer removed
    Removed,
}

impl FinalizerState {
    /// Derive the current state from the object's metadata
    #[must_use]
    pub fn of(policy: &UnsealPolicy) -> Self {
        let deleting = policy.metadata.deletion_timestamp.is_some();
        match (has_finalizer(policy), deleting) {
            (false, deleting) => Self::NoFinalizer { deleting },
            (true, false) => Self::Active,
            (true, true) => Self::Terminating,
        }
    }
}

#[must_use]
pub fn has_finalizer(policy: &UnsealPolicy) -> bool {
    policy.finalizers().iter().any(|f| f == FINALIZER)
}

/// Finalizer list with ours appended exactly once
#[must_use]
pub fn with_finalizer(finalizers: &[String]) -> Vec<String> {
    let mut result = finalizers.to_vec();
    if !result.iter().any(|f| f == FINALIZER) {
        result.push(FINALIZER.to_string());
    }
    result
}

/// Finalizer list with every copy of ours removed
#[must_use]
pub fn without_finalizer(finalizers: &[String]) -> Vec<String> {
    finalizers
        .iter()
        .filter(|f| f.as_str() != FINALIZER)
        .cloned()
        .collect()
}
