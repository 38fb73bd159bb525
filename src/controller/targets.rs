//! # Targets
//!
//! Vault pods discovered through the policy's label selector.

use crate::controller::selector::LabelSelector;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;

/// One discovered Vault instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Pod name
    pub name: String,
    /// Pod IP, when one has been assigned
    pub address: Option<String>,
    /// Phase is Running, an address is assigned, and the Ready condition is True
    pub ready: bool,
}

impl Target {
    /// Address to connect to, only for targets that can be unsealed right now
    #[must_use]
    pub fn reachable_address(&self) -> Option<&str> {
        if self.ready {
            self.address.as_deref().filter(|a| !a.is_empty())
        } else {
            None
        }
    }
}

impl From<&Pod> for Target {
    fn from(pod: &Pod) -> Self {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let status = pod.status.as_ref();

        let address = status
            .and_then(|s| s.pod_ip.clone())
            .filter(|ip| !ip.is_empty());
        let running = status.and_then(|s| s.phase.as_deref()) == Some("Running");
        let ready_condition = status
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            });

        Self {
            ready: running && address.is_some() && ready_condition,
            name,
            address,
        }
    }
}

/// Lists candidate targets in a namespace
#[async_trait]
pub trait TargetLister: Send + Sync {
    async fn list_targets(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> anyhow::Result<Vec<Target>>;
}
