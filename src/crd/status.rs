//! # UnsealPolicy Status
//!
//! Status types for tracking reconciliation state and conditions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of the UnsealPolicy resource
///
/// `targetsChecked` and `targetsUnsealed` describe only the most recent pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnsealPolicyStatus {
    /// Targets visited during the last pass, in visiting order
    #[serde(default)]
    pub targets_checked: Vec<String>,
    /// Targets reported unsealed during the last pass
    #[serde(default)]
    pub targets_unsealed: Vec<String>,
    /// Conditions represent the latest available observations (at most one per type)
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Last reconciliation time (RFC3339)
    #[serde(default)]
    pub last_reconcile_time: Option<String>,
    /// Observed generation
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Condition represents a status condition for the resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: ConditionType,
    /// Status of condition
    pub status: ConditionStatus,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing condition
    #[serde(default)]
    pub message: Option<String>,
}

/// Condition types reported on an UnsealPolicy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ConditionType {
    /// At least one target ended the last pass unsealed
    Ready,
    /// Key material could not be loaded
    KeysMissing,
    /// The Vault client could not be configured
    #[serde(rename = "VaultAPIFailure")]
    VaultApiFailure,
    /// No usable targets were found
    PodUnavailable,
}

impl ConditionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::KeysMissing => "KeysMissing",
            Self::VaultApiFailure => "VaultAPIFailure",
            Self::PodUnavailable => "PodUnavailable",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}
