//! # UnsealPolicy Spec
//!
//! Main CRD specification types and default values.

use crate::constants::DEFAULT_CA_BUNDLE_KEY;
use serde::{Deserialize, Serialize};

/// UnsealPolicy Custom Resource Definition
///
/// Declares which Vault pods to watch, where their unseal key shares live,
/// and how often the controller should check them.
///
/// # Example
///
/// ```yaml
/// apiVersion: unseal.octopilot.io/v1
/// kind: UnsealPolicy
/// metadata:
///   name: vault
///   namespace: vault
/// spec:
///   connection:
///     url: https://{address}:8200
///     caBundleRef:
///       name: vault-tls
///   keySources:
///     - name: vault-unseal-keys
///       field: keys
///   targetSelector: app.kubernetes.io/name=vault
///   mode:
///     highAvailability: true
///   keyThreshold: 3
///   interval: 30s
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "UnsealPolicy",
    group = "unseal.octopilot.io",
    version = "v1",
    namespaced,
    status = "crate::crd::UnsealPolicyStatus",
    shortname = "up",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Unsealed", "type":"string", "jsonPath":".status.targetsUnsealed"}"#,
    printcolumn = r#"{"name":"Last Reconcile", "type":"string", "jsonPath":".status.lastReconcileTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UnsealPolicySpec {
    /// How to reach each Vault target
    pub connection: Connection,
    /// Secrets holding the unseal key shares, in submission order
    pub key_sources: Vec<KeyRef>,
    /// Label selector matching the Vault pods, e.g. `app=vault,component!=agent`
    pub target_selector: String,
    /// Unseal behaviour across multiple targets
    #[serde(default)]
    pub mode: UnsealMode,
    /// Maximum number of keys submitted per target; 0 means all loaded keys
    #[serde(default)]
    pub key_threshold: i32,
    /// Interval between passes (Kubernetes duration, e.g. "30s", "5m")
    /// Defaults to the controller-wide reconcile interval
    #[serde(default)]
    pub interval: Option<String>,
}

/// Vault connection settings shared by every target
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// URL template for a target. `{address}` is replaced by the pod IP.
    /// Without a scheme the controller connects to `http://<pod-ip>:8200`.
    pub url: String,
    /// Secret holding a PEM CA bundle trusted for Vault TLS
    #[serde(default)]
    pub ca_bundle_ref: Option<CaBundleRef>,
    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Reference to a PEM CA bundle stored in a Secret
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaBundleRef {
    /// Secret namespace; defaults to the policy namespace
    #[serde(default)]
    pub namespace: Option<String>,
    /// Secret name
    pub name: String,
    /// Key within the secret
    #[serde(default = "default_ca_bundle_key")]
    pub key: String,
}

/// Pointer to one field of one Secret containing unseal keys
///
/// The field holds either a JSON array of strings or newline-separated keys.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyRef {
    /// Secret namespace; defaults to the policy namespace
    #[serde(default)]
    pub namespace: Option<String>,
    /// Secret name
    pub name: String,
    /// Key within the secret
    pub field: String,
}

impl KeyRef {
    /// Namespace to read from, falling back to `default_namespace` when unset or empty
    #[must_use]
    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => default_namespace,
        }
    }
}

/// Unseal mode
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnsealMode {
    /// Unseal every ready target instead of stopping after the first success
    #[serde(default)]
    pub high_availability: bool,
}

#[must_use]
pub fn default_ca_bundle_key() -> String {
    DEFAULT_CA_BUNDLE_KEY.to_string()
}
