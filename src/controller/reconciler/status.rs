//! # Status Management
//!
//! Condition bookkeeping and status persistence for `UnsealPolicy` resources.
//!
//! Conditions are keyed by type: `upsert_condition` replaces an existing entry
//! in place, so the list never holds two conditions of the same type.

use crate::controller::reconciler::types::{PolicyId, PolicyStore, ReconcilerError};
use crate::crd::{Condition, ConditionStatus, ConditionType, UnsealPolicyStatus};
use chrono::Utc;
use tracing::debug;

/// Condition reasons
pub mod reason {
    pub const UNSEALED: &str = "Unsealed";
    pub const NO_TARGET_UNSEALED: &str = "NoTargetUnsealed";
    pub const INVALID_SELECTOR: &str = "InvalidSelector";
    pub const LIST_FAILED: &str = "ListFailed";
    pub const NO_TARGETS: &str = "NoTargets";
    pub const KEY_LOAD_FAILED: &str = "KeyLoadFailed";
    pub const CLIENT_CONFIGURATION_FAILED: &str = "ClientConfigurationFailed";
}

/// Insert or replace the condition of `condition_type`
///
/// `lastTransitionTime` is kept when the status value is unchanged.
pub fn upsert_condition(
    conditions: &mut Vec<Condition>,
    condition_type: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
) {
    let now = Utc::now().to_rfc3339();
    let message = message.into();

    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) {
        if existing.status != status || existing.last_transition_time.is_none() {
            existing.last_transition_time = Some(now);
        }
        existing.status = status;
        existing.reason = Some(reason.to_string());
        existing.message = Some(message);
        return;
    }

    conditions.push(Condition {
        r#type: condition_type,
        status,
        last_transition_time: Some(now),
        reason: Some(reason.to_string()),
        message: Some(message),
    });
}

/// Remove the condition of `condition_type` if present
pub fn clear_condition(conditions: &mut Vec<Condition>, condition_type: ConditionType) {
    conditions.retain(|c| c.r#type != condition_type);
}

#[must_use]
pub fn find_condition(conditions: &[Condition], condition_type: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Stamp `lastReconcileTime` and write the status subresource
pub async fn persist_status(
    store: &dyn PolicyStore,
    id: &PolicyId,
    status: &mut UnsealPolicyStatus,
) -> Result<(), ReconcilerError> {
    status.last_reconcile_time = Some(Utc::now().to_rfc3339());
    store
        .patch_status(id, status)
        .await
        .map_err(ReconcilerError::StatusUpdate)?;
    debug!(policy = %id.name, namespace = %id.namespace, "Status updated");
    Ok(())
}
