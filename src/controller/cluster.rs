//! # Cluster Access
//!
//! Kubernetes implementations of the engine's collaborator traits.
//!
//! - `PolicyStore`: `UnsealPolicy` reads, finalizer and status merge patches
//! - `TargetLister`: Pod list by label selector
//! - `SecretStore`: Secret reads (`data` and `stringData`)

use crate::constants::FIELD_MANAGER;
use crate::controller::keys::SecretStore;
use crate::controller::reconciler::finalizer::{with_finalizer, without_finalizer};
use crate::controller::reconciler::{PolicyId, PolicyStore};
use crate::controller::selector::LabelSelector;
use crate::controller::targets::{Target, TargetLister};
use crate::crd::{UnsealPolicy, UnsealPolicyStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use zeroize::Zeroize;
use tracing::debug;

/// Kubernetes API backend for the reconciler
#[derive(Clone)]
pub struct KubeBackend {
    client: Client,
}

impl KubeBackend {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn policies(&self, namespace: &str) -> Api<UnsealPolicy> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Replace the finalizer list, guarded by the observed resource version
    async fn patch_finalizers(&self, policy: &UnsealPolicy, finalizers: Vec<String>) -> Result<()> {
        let namespace = policy.namespace().unwrap_or_default();
        let name = policy.name_any();
        let patch = match policy.resource_version() {
            Some(version) => json!({
                "metadata": { "finalizers": finalizers, "resourceVersion": version }
            }),
            None => json!({ "metadata": { "finalizers": finalizers } }),
        };

        match self
            .policies(&namespace)
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            // Already gone: nothing left to guard
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to patch finalizers on {namespace}/{name}"))),
        }
    }
}

impl std::fmt::Debug for KubeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl PolicyStore for KubeBackend {
    async fn get(&self, id: &PolicyId) -> Result<Option<UnsealPolicy>> {
        self.policies(&id.namespace)
            .get_opt(&id.name)
            .await
            .with_context(|| format!("Failed to get UnsealPolicy {id}"))
    }

    async fn add_finalizer(&self, policy: &UnsealPolicy) -> Result<()> {
        self.patch_finalizers(policy, with_finalizer(policy.finalizers()))
            .await
    }

    async fn remove_finalizer(&self, policy: &UnsealPolicy) -> Result<()> {
        self.patch_finalizers(policy, without_finalizer(policy.finalizers()))
            .await
    }

    async fn patch_status(&self, id: &PolicyId, status: &UnsealPolicyStatus) -> Result<()> {
        let patch = json!({ "status": status });
        self.policies(&id.namespace)
            .patch_status(
                &id.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(patch),
            )
            .await
            .with_context(|| format!("Failed to patch status of UnsealPolicy {id}"))?;
        Ok(())
    }
}

#[async_trait]
impl TargetLister for KubeBackend {
    async fn list_targets(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Target>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&selector.to_string());
        let list = pods
            .list(&params)
            .await
            .with_context(|| format!("Failed to list pods in {namespace} with selector '{selector}'"))?;

        let targets: Vec<Target> = list
            .items
            .iter()
            .filter(|pod| selector.matches(pod.labels()))
            .map(Target::from)
            .collect();
        debug!(namespace = %namespace, count = targets.len(), "Listed targets");
        Ok(targets)
    }
}

#[async_trait]
impl SecretStore for KubeBackend {
    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = secrets
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get secret {namespace}/{name}"))?
        else {
            return Ok(None);
        };
        Ok(Some(secret_data(secret)))
    }
}

/// Merge `stringData` over `data`, as the API server does on write
fn secret_data(secret: Secret) -> BTreeMap<String, Vec<u8>> {
    let mut data: BTreeMap<String, Vec<u8>> = secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.0))
        .collect();
    for (key, value) in secret.string_data.unwrap_or_default() {
        if let Some(mut replaced) = data.insert(key, value.into_bytes()) {
            replaced.zeroize();
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    #[test]
    fn test_secret_data_merges_string_data() {
        let secret = Secret {
            data: Some(BTreeMap::from([
                ("keys".to_string(), ByteString(b"k1\nk2".to_vec())),
                ("ca.crt".to_string(), ByteString(b"old".to_vec())),
            ])),
            string_data: Some(BTreeMap::from([(
                "ca.crt".to_string(),
                "new".to_string(),
            )])),
            ..Secret::default()
        };

        let data = secret_data(secret);
        assert_eq!(data.get("keys").map(Vec::as_slice), Some(b"k1\nk2".as_slice()));
        assert_eq!(data.get("ca.crt").map(Vec::as_slice), Some(b"new".as_slice()));
    }

    #[test]
    fn test_empty_secret_has_no_fields() {
        assert!(secret_data(Secret::default()).is_empty());
    }
}
