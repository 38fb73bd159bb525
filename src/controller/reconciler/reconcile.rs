//! # Reconciliation Logic
//!
//! One reconcile pass for an `UnsealPolicy`:
//!
//! 1. Fetch the policy (gone means nothing to do)
//! 2. Finalizer lifecycle: attach, or clean up when deletion was requested
//! 3. Resolve the requeue interval and reset the per-pass target lists
//! 4. Parse the selector and discover targets
//! 5. Load key shares
//! 6. Build the Vault client from the connection's TLS settings
//! 7. Unseal each ready target, in discovery order
//! 8. Set `Ready` and clear the failure conditions
//! 9. Persist status and requeue at the interval
//!
//! Stage failures in 4-6 set their condition, persist, and return an error
//! carrying the interval so the error policy can requeue no later than a
//! normal pass would. Per-target failures in 7 are logged and counted but do
//! not fail the pass.

use crate::controller::keys::{load_keys, KeyMaterial};
use crate::controller::reconciler::finalizer::FinalizerState;
use crate::controller::reconciler::status::{clear_condition, persist_status, reason, upsert_condition};
use crate::controller::reconciler::types::{PassError, PolicyId, Reconciler, ReconcilerError, Requeue};
use crate::controller::reconciler::validation::effective_interval;
use crate::controller::selector::LabelSelector;
use crate::controller::targets::Target;
use crate::controller::unseal::{derive_endpoint, unseal_target, TlsSettings, UnsealApi, UnsealError};
use crate::crd::{ConditionStatus, ConditionType, Connection, UnsealPolicy, UnsealPolicySpec, UnsealPolicyStatus};
use crate::observability::metrics::{
    ATTEMPT_ERROR, ATTEMPT_SEALED, ATTEMPT_SKIPPED, ATTEMPT_UNSEALED, OUTCOME_ERROR, OUTCOME_SUCCESS,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

impl Reconciler {
    /// Run one reconcile pass for `id`
    ///
    /// # Errors
    ///
    /// Returns `PassError` when a stage fails. `requeue_after` is set when the
    /// failure was recorded in the policy status.
    pub async fn reconcile(&self, id: &PolicyId) -> Result<Requeue, PassError> {
        let span = info_span!("reconcile", policy = %id.name, namespace = %id.namespace);
        self.reconcile_policy(id).instrument(span).await
    }

    async fn reconcile_policy(&self, id: &PolicyId) -> Result<Requeue, PassError> {
        let Some(policy) = self
            .policies
            .get(id)
            .await
            .map_err(ReconcilerError::PolicyAccess)?
        else {
            debug!("Policy not found, nothing to do");
            return Ok(Requeue::AwaitChange);
        };

        match FinalizerState::of(&policy) {
            FinalizerState::NoFinalizer { deleting: false } => {
                self.policies
                    .add_finalizer(&policy)
                    .await
                    .map_err(ReconcilerError::Finalizer)?;
                info!("Finalizer added");
                Ok(Requeue::AwaitChange)
            }
            FinalizerState::NoFinalizer { deleting: true } | FinalizerState::Removed => {
                Ok(Requeue::AwaitChange)
            }
            FinalizerState::Terminating => {
                let state = self.cleanup(id, &policy).await?;
                debug!(?state, "Cleanup finished");
                Ok(Requeue::AwaitChange)
            }
            FinalizerState::Active => {
                info!("🔄 Reconciling UnsealPolicy");
                let start = Instant::now();
                let result = self.run_pass(id, &policy).await;
                let outcome = if result.is_ok() {
                    OUTCOME_SUCCESS
                } else {
                    OUTCOME_ERROR
                };
                self.metrics
                    .observe_reconcile(&id.name, &id.namespace, outcome, start.elapsed());
                result
            }
        }
    }

    /// Drop metric series for the policy and its last known targets, then release it
    async fn cleanup(&self, id: &PolicyId, policy: &UnsealPolicy) -> Result<FinalizerState, PassError> {
        let mut targets: Vec<String> = Vec::new();
        if let Some(status) = &policy.status {
            for name in status.targets_checked.iter().chain(&status.targets_unsealed) {
                if !targets.contains(name) {
                    targets.push(name.clone());
                }
            }
        }

        self.metrics.forget(&id.name, &id.namespace, &targets);
        self.policies
            .remove_finalizer(policy)
            .await
            .map_err(ReconcilerError::Finalizer)?;
        info!(targets = targets.len(), "Policy cleaned up, finalizer removed");
        Ok(FinalizerState::Removed)
    }

    async fn run_pass(&self, id: &PolicyId, policy: &UnsealPolicy) -> Result<Requeue, PassError> {
        let spec = &policy.spec;
        let interval = effective_interval(spec.interval.as_deref(), self.default_interval);

        let mut status = policy.status.clone().unwrap_or_default();
        status.targets_checked.clear();
        status.targets_unsealed.clear();
        status.observed_generation = policy.metadata.generation;

        let selector = match LabelSelector::parse(&spec.target_selector) {
            Ok(selector) => selector,
            Err(e) => {
                return Err(self
                    .abort_pass(
                        id,
                        &mut status,
                        ConditionType::PodUnavailable,
                        reason::INVALID_SELECTOR,
                        e.into(),
                        interval,
                    )
                    .await);
            }
        };

        let targets = match self.targets.list_targets(&id.namespace, &selector).await {
            Ok(targets) => targets,
            Err(e) => {
                return Err(self
                    .abort_pass(
                        id,
                        &mut status,
                        ConditionType::PodUnavailable,
                        reason::LIST_FAILED,
                        ReconcilerError::ListTargets(e),
                        interval,
                    )
                    .await);
            }
        };
        self.metrics
            .set_targets_discovered(&id.name, &id.namespace, targets.len());

        if targets.is_empty() {
            let message = format!("no pods match selector '{selector}'");
            info!(selector = %selector, "No targets found");
            upsert_condition(
                &mut status.conditions,
                ConditionType::PodUnavailable,
                ConditionStatus::True,
                reason::NO_TARGETS,
                message.clone(),
            );
            upsert_condition(
                &mut status.conditions,
                ConditionType::Ready,
                ConditionStatus::False,
                reason::NO_TARGETS,
                message,
            );
            persist_status(self.policies.as_ref(), id, &mut status).await?;
            return Ok(Requeue::After(interval));
        }

        let keys = match load_keys(
            self.secrets.as_ref(),
            &id.namespace,
            &spec.key_sources,
            spec.key_threshold,
        )
        .await
        {
            Ok(keys) => keys,
            Err(e) => {
                return Err(self
                    .abort_pass(
                        id,
                        &mut status,
                        ConditionType::KeysMissing,
                        reason::KEY_LOAD_FAILED,
                        e.into(),
                        interval,
                    )
                    .await);
            }
        };
        self.metrics.set_keys_loaded(&id.name, &id.namespace, keys.len());

        let api = match self.connect(id, &spec.connection).await {
            Ok(api) => api,
            Err(e) => {
                return Err(self
                    .abort_pass(
                        id,
                        &mut status,
                        ConditionType::VaultApiFailure,
                        reason::CLIENT_CONFIGURATION_FAILED,
                        ReconcilerError::ClientConfiguration(e),
                        interval,
                    )
                    .await);
            }
        };

        self.unseal_targets(id, spec, &targets, api.as_ref(), &keys, &mut status)
            .await;
        drop(keys);

        let unsealed = status.targets_unsealed.len();
        if unsealed > 0 {
            upsert_condition(
                &mut status.conditions,
                ConditionType::Ready,
                ConditionStatus::True,
                reason::UNSEALED,
                format!("{unsealed} of {} target(s) unsealed", targets.len()),
            );
        } else {
            upsert_condition(
                &mut status.conditions,
                ConditionType::Ready,
                ConditionStatus::False,
                reason::NO_TARGET_UNSEALED,
                format!("none of {} target(s) reported unsealed", targets.len()),
            );
        }
        clear_condition(&mut status.conditions, ConditionType::KeysMissing);
        clear_condition(&mut status.conditions, ConditionType::PodUnavailable);
        clear_condition(&mut status.conditions, ConditionType::VaultApiFailure);

        persist_status(self.policies.as_ref(), id, &mut status).await?;

        info!(
            checked = status.targets_checked.len(),
            unsealed,
            requeue_secs = interval.as_secs(),
            "✅ Reconcile pass complete"
        );
        Ok(Requeue::After(interval))
    }

    /// Visit targets in order, recording each in `status`
    async fn unseal_targets(
        &self,
        id: &PolicyId,
        spec: &UnsealPolicySpec,
        targets: &[Target],
        api: &dyn UnsealApi,
        keys: &KeyMaterial,
        status: &mut UnsealPolicyStatus,
    ) {
        for target in targets {
            status.targets_checked.push(target.name.clone());

            let Some(address) = target.reachable_address() else {
                debug!(target = %target.name, "Target not ready, skipping");
                self.metrics
                    .record_unseal_attempt(&id.name, &id.namespace, &target.name, ATTEMPT_SKIPPED);
                continue;
            };

            let endpoint = match derive_endpoint(&spec.connection.url, address) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!(target = %target.name, error = %e, "Cannot derive Vault endpoint");
                    self.metrics
                        .record_unseal_attempt(&id.name, &id.namespace, &target.name, ATTEMPT_ERROR);
                    continue;
                }
            };

            match unseal_target(api, &endpoint, keys).await {
                Ok(outcome) => {
                    self.metrics.set_target_sealed(
                        &id.name,
                        &id.namespace,
                        &target.name,
                        outcome.sealed,
                    );
                    if outcome.sealed {
                        warn!(
                            target = %target.name,
                            keys_submitted = outcome.keys_submitted,
                            progress = outcome.progress,
                            "Target still sealed after submitting all keys"
                        );
                        self.metrics.record_unseal_attempt(
                            &id.name,
                            &id.namespace,
                            &target.name,
                            ATTEMPT_SEALED,
                        );
                        continue;
                    }

                    info!(
                        target = %target.name,
                        keys_submitted = outcome.keys_submitted,
                        "Target unsealed"
                    );
                    self.metrics.record_unseal_attempt(
                        &id.name,
                        &id.namespace,
                        &target.name,
                        ATTEMPT_UNSEALED,
                    );
                    status.targets_unsealed.push(target.name.clone());
                    if !spec.mode.high_availability {
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        target = %target.name,
                        endpoint = %endpoint,
                        error = %e,
                        "Unseal attempt failed"
                    );
                    self.metrics
                        .record_unseal_attempt(&id.name, &id.namespace, &target.name, ATTEMPT_ERROR);
                }
            }
        }
    }

    /// Build the Vault client, reading the CA bundle when one is referenced
    async fn connect(
        &self,
        id: &PolicyId,
        connection: &Connection,
    ) -> Result<Arc<dyn UnsealApi>, UnsealError> {
        let ca_bundle_pem = match &connection.ca_bundle_ref {
            None => None,
            Some(ca) => {
                let namespace = ca
                    .namespace
                    .as_deref()
                    .filter(|ns| !ns.is_empty())
                    .unwrap_or(&id.namespace);
                let data = self
                    .secrets
                    .get_secret_data(namespace, &ca.name)
                    .await
                    .map_err(|e| {
                        UnsealError::ClientConfiguration(format!(
                            "failed to read CA bundle secret {namespace}/{}: {e}",
                            ca.name
                        ))
                    })?
                    .ok_or_else(|| {
                        UnsealError::ClientConfiguration(format!(
                            "CA bundle secret {namespace}/{} not found",
                            ca.name
                        ))
                    })?;
                let pem = data.get(&ca.key).cloned().ok_or_else(|| {
                    UnsealError::ClientConfiguration(format!(
                        "key '{}' not found in CA bundle secret {namespace}/{}",
                        ca.key, ca.name
                    ))
                })?;
                Some(pem)
            }
        };

        self.connector.connect(&TlsSettings {
            ca_bundle_pem,
            insecure_skip_verify: connection.insecure_skip_verify,
        })
    }

    /// Record a fatal stage failure in status and build the pass error
    async fn abort_pass(
        &self,
        id: &PolicyId,
        status: &mut UnsealPolicyStatus,
        condition: ConditionType,
        reason: &str,
        error: ReconcilerError,
        interval: Duration,
    ) -> PassError {
        warn!(condition = %condition, reason, error = %error, "Reconcile pass aborted");
        let message = error.to_string();
        upsert_condition(
            &mut status.conditions,
            condition,
            ConditionStatus::True,
            reason,
            message.clone(),
        );
        upsert_condition(
            &mut status.conditions,
            ConditionType::Ready,
            ConditionStatus::False,
            reason,
            message,
        );

        let pass_error = PassError::at_interval(error, interval);
        match persist_status(self.policies.as_ref(), id, status).await {
            Ok(()) => pass_error,
            Err(persist_error) => {
                error!(error = %persist_error, "Failed to record failure in status");
                pass_error.with_status_error(persist_error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FINALIZER;
    use crate::controller::keys::SecretStore;
    use crate::controller::reconciler::finalizer::{with_finalizer, without_finalizer};
    use crate::controller::reconciler::status::find_condition;
    use crate::controller::reconciler::types::PolicyStore;
    use crate::controller::targets::TargetLister;
    use crate::controller::unseal::{SealState, UnsealConnector};
    use crate::crd::{CaBundleRef, Condition, KeyRef, UnsealMode};
    use crate::observability::MetricsSink;
    use async_trait::async_trait;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

    // ---- fakes ----

    #[derive(Default)]
    struct FakePolicies {
        policy: Mutex<Option<UnsealPolicy>>,
        status_patches: Mutex<Vec<UnsealPolicyStatus>>,
        fail_status: AtomicBool,
    }

    #[async_trait]
    impl PolicyStore for FakePolicies {
        async fn get(&self, _id: &PolicyId) -> anyhow::Result<Option<UnsealPolicy>> {
            Ok(self.policy.lock().unwrap().clone())
        }

        async fn add_finalizer(&self, _policy: &UnsealPolicy) -> anyhow::Result<()> {
            let mut guard = self.policy.lock().unwrap();
            if let Some(policy) = guard.as_mut() {
                let current = policy.metadata.finalizers.clone().unwrap_or_default();
                policy.metadata.finalizers = Some(with_finalizer(&current));
            }
            Ok(())
        }

        async fn remove_finalizer(&self, _policy: &UnsealPolicy) -> anyhow::Result<()> {
            let mut guard = self.policy.lock().unwrap();
            let gone = guard.as_mut().is_some_and(|policy| {
                let current = policy.metadata.finalizers.clone().unwrap_or_default();
                let remaining = without_finalizer(&current);
                let collectable = remaining.is_empty() && policy.metadata.deletion_timestamp.is_some();
                policy.metadata.finalizers = Some(remaining);
                collectable
            });
            if gone {
                *guard = None;
            }
            Ok(())
        }

        async fn patch_status(&self, _id: &PolicyId, status: &UnsealPolicyStatus) -> anyhow::Result<()> {
            if self.fail_status.load(Ordering::SeqCst) {
                anyhow::bail!("status subresource unavailable");
            }
            self.status_patches.lock().unwrap().push(status.clone());
            if let Some(policy) = self.policy.lock().unwrap().as_mut() {
                policy.status = Some(status.clone());
            }
            Ok(())
        }
    }

    /// `None` makes listing fail
    struct FakeTargets {
        targets: Mutex<Option<Vec<Target>>>,
        selectors: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TargetLister for FakeTargets {
        async fn list_targets(
            &self,
            _namespace: &str,
            selector: &LabelSelector,
        ) -> anyhow::Result<Vec<Target>> {
            self.selectors.lock().unwrap().push(selector.to_string());
            self.targets
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow::anyhow!("pods is forbidden"))
        }
    }

    #[derive(Default)]
    struct FakeSecrets {
        secrets: Mutex<BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>>,
    }

    impl FakeSecrets {
        fn put(&self, namespace: &str, name: &str, field: &str, value: &str) {
            self.secrets
                .lock()
                .unwrap()
                .entry((namespace.to_string(), name.to_string()))
                .or_default()
                .insert(field.to_string(), value.as_bytes().to_vec());
        }
    }

    #[async_trait]
    impl SecretStore for FakeSecrets {
        async fn get_secret_data(
            &self,
            namespace: &str,
            name: &str,
        ) -> anyhow::Result<Option<BTreeMap<String, Vec<u8>>>> {
            Ok(self
                .secrets
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), name.to_string()))
                .cloned())
        }
    }

    struct Node {
        sealed: bool,
        threshold: u32,
        progress: u32,
        submitted: Vec<String>,
        status_calls: usize,
    }

    /// Vault instances keyed by endpoint; unknown endpoints are unreachable
    #[derive(Default)]
    struct FakeVault {
        nodes: Mutex<HashMap<String, Node>>,
    }

    impl FakeVault {
        fn with_node(self, address: &str, sealed: bool, threshold: u32) -> Self {
            self.nodes.lock().unwrap().insert(
                endpoint(address),
                Node {
                    sealed,
                    threshold,
                    progress: 0,
                    submitted: Vec::new(),
                    status_calls: 0,
                },
            );
            self
        }

        fn submitted(&self, address: &str) -> Vec<String> {
            self.nodes
                .lock()
                .unwrap()
                .get(&endpoint(address))
                .map(|n| n.submitted.clone())
                .unwrap_or_default()
        }

        fn status_calls(&self, address: &str) -> usize {
            self.nodes
                .lock()
                .unwrap()
                .get(&endpoint(address))
                .map_or(0, |n| n.status_calls)
        }

        fn state(node: &Node) -> SealState {
            SealState {
                sealed: node.sealed,
                threshold: node.threshold,
                total_shares: 5,
                progress: node.progress,
            }
        }

        fn unreachable(endpoint: &str) -> UnsealError {
            UnsealError::Transport {
                url: endpoint.to_string(),
                message: "connection refused".to_string(),
            }
        }
    }

    #[async_trait]
    impl UnsealApi for FakeVault {
        async fn seal_status(&self, endpoint: &str) -> Result<SealState, UnsealError> {
            let mut nodes = self.nodes.lock().unwrap();
            let node = nodes
                .get_mut(endpoint)
                .ok_or_else(|| Self::unreachable(endpoint))?;
            node.status_calls += 1;
            Ok(Self::state(node))
        }

        async fn submit_key(&self, endpoint: &str, key: &str) -> Result<SealState, UnsealError> {
            let mut nodes = self.nodes.lock().unwrap();
            let node = nodes
                .get_mut(endpoint)
                .ok_or_else(|| Self::unreachable(endpoint))?;
            node.submitted.push(key.to_string());
            node.progress += 1;
            if node.progress >= node.threshold {
                node.sealed = false;
                node.progress = 0;
            }
            Ok(Self::state(node))
        }
    }

    struct FakeConnector {
        vault: Arc<FakeVault>,
        fail: AtomicBool,
        seen: Mutex<Vec<TlsSettings>>,
    }

    impl UnsealConnector for FakeConnector {
        fn connect(&self, tls: &TlsSettings) -> Result<Arc<dyn UnsealApi>, UnsealError> {
            self.seen.lock().unwrap().push(tls.clone());
            if self.fail.load(Ordering::SeqCst) {
                return Err(UnsealError::ClientConfiguration("bad TLS settings".to_string()));
            }
            let api: Arc<dyn UnsealApi> = Arc::clone(&self.vault) as Arc<dyn UnsealApi>;
            Ok(api)
        }
    }

    #[derive(Default)]
    struct RecordingMetrics {
        reconciles: Mutex<Vec<String>>,
        attempts: Mutex<Vec<(String, String)>>,
        sealed: Mutex<BTreeMap<String, bool>>,
        keys_loaded: Mutex<Option<usize>>,
        forgotten: Mutex<Vec<Vec<String>>>,
    }

    impl MetricsSink for RecordingMetrics {
        fn observe_reconcile(&self, _policy: &str, _namespace: &str, outcome: &str, _elapsed: Duration) {
            self.reconciles.lock().unwrap().push(outcome.to_string());
        }

        fn record_unseal_attempt(&self, _policy: &str, _namespace: &str, target: &str, outcome: &str) {
            self.attempts
                .lock()
                .unwrap()
                .push((target.to_string(), outcome.to_string()));
        }

        fn set_target_sealed(&self, _policy: &str, _namespace: &str, target: &str, sealed: bool) {
            self.sealed.lock().unwrap().insert(target.to_string(), sealed);
        }

        fn set_keys_loaded(&self, _policy: &str, _namespace: &str, count: usize) {
            *self.keys_loaded.lock().unwrap() = Some(count);
        }

        fn set_targets_discovered(&self, _policy: &str, _namespace: &str, _count: usize) {}

        fn forget(&self, _policy: &str, _namespace: &str, targets: &[String]) {
            self.forgotten.lock().unwrap().push(targets.to_vec());
        }
    }

    // ---- harness ----

    struct Harness {
        policies: Arc<FakePolicies>,
        targets: Arc<FakeTargets>,
        secrets: Arc<FakeSecrets>,
        connector: Arc<FakeConnector>,
        vault: Arc<FakeVault>,
        metrics: Arc<RecordingMetrics>,
        reconciler: Reconciler,
    }

    impl Harness {
        fn new(policy: UnsealPolicy, targets: Vec<Target>, vault: FakeVault) -> Self {
            let policies = Arc::new(FakePolicies::default());
            *policies.policy.lock().unwrap() = Some(policy);
            let targets = Arc::new(FakeTargets {
                targets: Mutex::new(Some(targets)),
                selectors: Mutex::new(Vec::new()),
            });
            let secrets = Arc::new(FakeSecrets::default());
            secrets.put("vault", "vault-keys", "keys", "k1\nk2\nk3");
            let vault = Arc::new(vault);
            let connector = Arc::new(FakeConnector {
                vault: Arc::clone(&vault),
                fail: AtomicBool::new(false),
                seen: Mutex::new(Vec::new()),
            });
            let metrics = Arc::new(RecordingMetrics::default());
            let reconciler = Reconciler::new(
                Arc::clone(&policies) as Arc<dyn PolicyStore>,
                Arc::clone(&targets) as Arc<dyn TargetLister>,
                Arc::clone(&secrets) as Arc<dyn SecretStore>,
                Arc::clone(&connector) as Arc<dyn UnsealConnector>,
                Arc::clone(&metrics) as Arc<dyn MetricsSink>,
                DEFAULT_INTERVAL,
            );
            Self {
                policies,
                targets,
                secrets,
                connector,
                vault,
                metrics,
                reconciler,
            }
        }

        async fn reconcile(&self) -> Result<Requeue, PassError> {
            self.reconciler.reconcile(&id()).await
        }

        fn status(&self) -> UnsealPolicyStatus {
            self.policies
                .policy
                .lock()
                .unwrap()
                .as_ref()
                .and_then(|p| p.status.clone())
                .unwrap_or_default()
        }

        fn condition(&self, condition_type: ConditionType) -> Option<Condition> {
            find_condition(&self.status().conditions, condition_type).cloned()
        }
    }

    fn id() -> PolicyId {
        PolicyId::new("vault", "vault")
    }

    fn endpoint(address: &str) -> String {
        format!("http://{address}:8200")
    }

    fn policy() -> UnsealPolicy {
        let mut policy = UnsealPolicy::new(
            "vault",
            UnsealPolicySpec {
                connection: Connection::default(),
                key_sources: vec![KeyRef {
                    namespace: None,
                    name: "vault-keys".to_string(),
                    field: "keys".to_string(),
                }],
                target_selector: "app=vault".to_string(),
                mode: UnsealMode::default(),
                key_threshold: 0,
                interval: None,
            },
        );
        policy.metadata.namespace = Some("vault".to_string());
        policy.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        policy.metadata.generation = Some(3);
        policy
    }

    fn ha_policy() -> UnsealPolicy {
        let mut policy = policy();
        policy.spec.mode.high_availability = true;
        policy
    }

    fn target(name: &str, address: &str) -> Target {
        Target {
            name: name.to_string(),
            address: Some(address.to_string()),
            ready: true,
        }
    }

    fn pending(name: &str) -> Target {
        Target {
            name: name.to_string(),
            address: None,
            ready: false,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    // ---- happy paths ----

    #[tokio::test]
    async fn test_single_sealed_target_is_unsealed() {
        let h = Harness::new(
            policy(),
            vec![target("vault-0", "10.0.0.1")],
            FakeVault::default().with_node("10.0.0.1", true, 3),
        );

        let requeue = h.reconcile().await.unwrap();

        assert_eq!(requeue, Requeue::After(DEFAULT_INTERVAL));
        assert_eq!(h.vault.submitted("10.0.0.1"), names(&["k1", "k2", "k3"]));
        let status = h.status();
        assert_eq!(status.targets_checked, names(&["vault-0"]));
        assert_eq!(status.targets_unsealed, names(&["vault-0"]));
        assert_eq!(status.observed_generation, Some(3));
        assert!(status.last_reconcile_time.is_some());
        let ready = h.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.reason.as_deref(), Some(reason::UNSEALED));
        assert_eq!(*h.metrics.reconciles.lock().unwrap(), vec![OUTCOME_SUCCESS]);
        assert_eq!(*h.metrics.keys_loaded.lock().unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_keys_after_unseal_are_never_sent() {
        let h = Harness::new(
            policy(),
            vec![target("vault-0", "10.0.0.1")],
            FakeVault::default().with_node("10.0.0.1", true, 2),
        );

        h.reconcile().await.unwrap();

        assert_eq!(h.vault.submitted("10.0.0.1"), names(&["k1", "k2"]));
        assert_eq!(h.status().targets_unsealed, names(&["vault-0"]));
    }

    #[tokio::test]
    async fn test_high_availability_unseals_every_target() {
        let h = Harness::new(
            ha_policy(),
            vec![
                target("vault-0", "10.0.0.1"),
                target("vault-1", "10.0.0.2"),
                target("vault-2", "10.0.0.3"),
            ],
            FakeVault::default()
                .with_node("10.0.0.1", true, 3)
                .with_node("10.0.0.2", true, 3)
                .with_node("10.0.0.3", false, 3),
        );

        h.reconcile().await.unwrap();

        let status = h.status();
        assert_eq!(status.targets_checked, names(&["vault-0", "vault-1", "vault-2"]));
        assert_eq!(status.targets_unsealed, names(&["vault-0", "vault-1", "vault-2"]));
        assert!(h.vault.submitted("10.0.0.3").is_empty());
    }

    #[tokio::test]
    async fn test_single_mode_stops_after_first_unsealed_target() {
        let h = Harness::new(
            policy(),
            vec![target("vault-0", "10.0.0.1"), target("vault-1", "10.0.0.2")],
            FakeVault::default()
                .with_node("10.0.0.1", true, 3)
                .with_node("10.0.0.2", true, 3),
        );

        h.reconcile().await.unwrap();

        let status = h.status();
        assert_eq!(status.targets_checked, names(&["vault-0"]));
        assert_eq!(status.targets_unsealed, names(&["vault-0"]));
        assert_eq!(h.vault.status_calls("10.0.0.2"), 0);
    }

    #[tokio::test]
    async fn test_already_unsealed_target_counts_and_stops_single_mode() {
        let h = Harness::new(
            policy(),
            vec![target("vault-0", "10.0.0.1"), target("vault-1", "10.0.0.2")],
            FakeVault::default()
                .with_node("10.0.0.1", false, 3)
                .with_node("10.0.0.2", true, 3),
        );

        h.reconcile().await.unwrap();

        assert_eq!(h.status().targets_unsealed, names(&["vault-0"]));
        assert!(h.vault.submitted("10.0.0.1").is_empty());
        assert_eq!(h.vault.status_calls("10.0.0.2"), 0);
    }

    // ---- partial failure ----

    #[tokio::test]
    async fn test_unreachable_target_does_not_fail_pass() {
        // 10.0.0.1 has no node, so every call to it fails
        let h = Harness::new(
            policy(),
            vec![target("vault-0", "10.0.0.1"), target("vault-1", "10.0.0.2")],
            FakeVault::default().with_node("10.0.0.2", true, 3),
        );

        let requeue = h.reconcile().await.unwrap();

        assert_eq!(requeue, Requeue::After(DEFAULT_INTERVAL));
        let status = h.status();
        assert_eq!(status.targets_checked, names(&["vault-0", "vault-1"]));
        assert_eq!(status.targets_unsealed, names(&["vault-1"]));
        assert_eq!(
            h.condition(ConditionType::Ready).unwrap().status,
            ConditionStatus::True
        );
        assert!(h
            .metrics
            .attempts
            .lock()
            .unwrap()
            .contains(&("vault-0".to_string(), ATTEMPT_ERROR.to_string())));
    }

    #[tokio::test]
    async fn test_not_ready_targets_are_checked_but_skipped() {
        let h = Harness::new(
            policy(),
            vec![pending("vault-0"), target("vault-1", "10.0.0.2")],
            FakeVault::default().with_node("10.0.0.2", true, 1),
        );

        h.reconcile().await.unwrap();

        let status = h.status();
        assert_eq!(status.targets_checked, names(&["vault-0", "vault-1"]));
        assert_eq!(status.targets_unsealed, names(&["vault-1"]));
        assert_eq!(
            h.metrics.attempts.lock().unwrap()[0],
            ("vault-0".to_string(), ATTEMPT_SKIPPED.to_string())
        );
    }

    #[tokio::test]
    async fn test_no_target_unsealed_is_ready_false_without_error() {
        let mut policy = policy();
        policy.spec.key_threshold = 2;
        let h = Harness::new(
            policy,
            vec![target("vault-0", "10.0.0.1")],
            FakeVault::default().with_node("10.0.0.1", true, 3),
        );

        let requeue = h.reconcile().await.unwrap();

        assert_eq!(requeue, Requeue::After(DEFAULT_INTERVAL));
        assert_eq!(h.vault.submitted("10.0.0.1"), names(&["k1", "k2"]));
        assert!(h.status().targets_unsealed.is_empty());
        let ready = h.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason.as_deref(), Some(reason::NO_TARGET_UNSEALED));
        assert_eq!(h.metrics.sealed.lock().unwrap().get("vault-0"), Some(&true));
    }

    // ---- stage failures ----

    #[tokio::test]
    async fn test_no_targets_sets_pod_unavailable() {
        let h = Harness::new(policy(), vec![], FakeVault::default());

        let requeue = h.reconcile().await.unwrap();

        assert_eq!(requeue, Requeue::After(DEFAULT_INTERVAL));
        let unavailable = h.condition(ConditionType::PodUnavailable).unwrap();
        assert_eq!(unavailable.status, ConditionStatus::True);
        assert_eq!(unavailable.reason.as_deref(), Some(reason::NO_TARGETS));
        assert_eq!(
            h.condition(ConditionType::Ready).unwrap().status,
            ConditionStatus::False
        );
        assert!(h.connector.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_selector_fails_pass_with_interval_hint() {
        let mut policy = policy();
        policy.spec.target_selector = "app in vault".to_string();
        policy.spec.interval = Some("30s".to_string());
        let h = Harness::new(policy, vec![target("vault-0", "10.0.0.1")], FakeVault::default());

        let err = h.reconcile().await.unwrap_err();

        assert!(matches!(err.source, ReconcilerError::InvalidSelector(_)));
        assert_eq!(err.requeue_after, Some(Duration::from_secs(30)));
        assert!(h.targets.selectors.lock().unwrap().is_empty());
        let unavailable = h.condition(ConditionType::PodUnavailable).unwrap();
        assert_eq!(unavailable.reason.as_deref(), Some(reason::INVALID_SELECTOR));
        assert_eq!(
            h.condition(ConditionType::Ready).unwrap().status,
            ConditionStatus::False
        );
        assert_eq!(*h.metrics.reconciles.lock().unwrap(), vec![OUTCOME_ERROR]);
    }

    #[tokio::test]
    async fn test_list_failure_fails_pass() {
        let h = Harness::new(policy(), vec![], FakeVault::default());
        *h.targets.targets.lock().unwrap() = None;

        let err = h.reconcile().await.unwrap_err();

        assert!(matches!(err.source, ReconcilerError::ListTargets(_)));
        assert_eq!(err.requeue_after, Some(DEFAULT_INTERVAL));
        assert_eq!(err.status_error, None);
        assert_eq!(
            h.condition(ConditionType::PodUnavailable)
                .unwrap()
                .reason
                .as_deref(),
            Some(reason::LIST_FAILED)
        );
    }

    #[tokio::test]
    async fn test_aborted_pass_reports_unrecorded_status() {
        let h = Harness::new(policy(), vec![], FakeVault::default());
        *h.targets.targets.lock().unwrap() = None;
        h.policies.fail_status.store(true, Ordering::SeqCst);

        let err = h.reconcile().await.unwrap_err();

        assert!(matches!(err.source, ReconcilerError::ListTargets(_)));
        assert_eq!(err.requeue_after, Some(DEFAULT_INTERVAL));
        assert!(err.status_error.is_some());
        assert!(h.condition(ConditionType::PodUnavailable).is_none());
    }

    #[tokio::test]
    async fn test_key_load_failure_sets_keys_missing() {
        let mut policy = policy();
        policy.spec.key_sources.push(KeyRef {
            namespace: None,
            name: "missing".to_string(),
            field: "keys".to_string(),
        });
        let h = Harness::new(
            policy,
            vec![target("vault-0", "10.0.0.1")],
            FakeVault::default().with_node("10.0.0.1", true, 3),
        );

        let err = h.reconcile().await.unwrap_err();

        assert!(matches!(err.source, ReconcilerError::KeyLoad(_)));
        assert_eq!(err.requeue_after, Some(DEFAULT_INTERVAL));
        let missing = h.condition(ConditionType::KeysMissing).unwrap();
        assert_eq!(missing.status, ConditionStatus::True);
        assert!(missing.message.unwrap().contains("vault/missing"));
        assert_eq!(h.vault.status_calls("10.0.0.1"), 0);
    }

    #[tokio::test]
    async fn test_client_configuration_failure_sets_vault_api_failure() {
        let h = Harness::new(
            policy(),
            vec![target("vault-0", "10.0.0.1")],
            FakeVault::default().with_node("10.0.0.1", true, 3),
        );
        h.connector.fail.store(true, Ordering::SeqCst);

        let err = h.reconcile().await.unwrap_err();

        assert!(matches!(err.source, ReconcilerError::ClientConfiguration(_)));
        let failure = h.condition(ConditionType::VaultApiFailure).unwrap();
        assert_eq!(
            failure.reason.as_deref(),
            Some(reason::CLIENT_CONFIGURATION_FAILED)
        );
    }

    #[tokio::test]
    async fn test_ca_bundle_is_read_from_secret() {
        let mut policy = policy();
        policy.spec.connection.ca_bundle_ref = Some(CaBundleRef {
            namespace: None,
            name: "vault-tls".to_string(),
            key: "ca.crt".to_string(),
        });
        let h = Harness::new(
            policy,
            vec![target("vault-0", "10.0.0.1")],
            FakeVault::default().with_node("10.0.0.1", false, 3),
        );
        h.secrets.put("vault", "vault-tls", "ca.crt", "PEM");

        h.reconcile().await.unwrap();

        let seen = h.connector.seen.lock().unwrap();
        assert_eq!(seen[0].ca_bundle_pem.as_deref(), Some(b"PEM".as_slice()));
        assert!(!seen[0].insecure_skip_verify);
    }

    #[tokio::test]
    async fn test_missing_ca_bundle_is_vault_api_failure() {
        let mut policy = policy();
        policy.spec.connection.ca_bundle_ref = Some(CaBundleRef {
            namespace: Some("certs".to_string()),
            name: "vault-tls".to_string(),
            key: "ca.crt".to_string(),
        });
        let h = Harness::new(
            policy,
            vec![target("vault-0", "10.0.0.1")],
            FakeVault::default().with_node("10.0.0.1", true, 3),
        );

        let err = h.reconcile().await.unwrap_err();

        assert!(matches!(err.source, ReconcilerError::ClientConfiguration(_)));
        assert!(err.to_string().contains("certs/vault-tls"));
        assert!(h.condition(ConditionType::VaultApiFailure).is_some());
    }

    #[tokio::test]
    async fn test_status_write_failure_is_error_without_hint() {
        let h = Harness::new(
            policy(),
            vec![target("vault-0", "10.0.0.1")],
            FakeVault::default().with_node("10.0.0.1", true, 3),
        );
        h.policies.fail_status.store(true, Ordering::SeqCst);

        let err = h.reconcile().await.unwrap_err();

        assert!(matches!(err.source, ReconcilerError::StatusUpdate(_)));
        assert_eq!(err.requeue_after, None);
    }

    // ---- recovery and idempotence ----

    #[tokio::test]
    async fn test_recovery_clears_failure_conditions() {
        let h = Harness::new(
            policy(),
            vec![target("vault-0", "10.0.0.1")],
            FakeVault::default().with_node("10.0.0.1", true, 3),
        );
        h.secrets.secrets.lock().unwrap().clear();
        h.reconcile().await.unwrap_err();
        assert!(h.condition(ConditionType::KeysMissing).is_some());

        h.secrets.put("vault", "vault-keys", "keys", r#"["k1","k2","k3"]"#);
        h.reconcile().await.unwrap();

        assert!(h.condition(ConditionType::KeysMissing).is_none());
        assert!(h.condition(ConditionType::PodUnavailable).is_none());
        assert!(h.condition(ConditionType::VaultApiFailure).is_none());
        let ready = h.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(h.status().conditions.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_passes_are_idempotent() {
        let h = Harness::new(
            ha_policy(),
            vec![target("vault-0", "10.0.0.1"), target("vault-1", "10.0.0.2")],
            FakeVault::default()
                .with_node("10.0.0.1", true, 3)
                .with_node("10.0.0.2", true, 3),
        );

        h.reconcile().await.unwrap();
        let first = h.status();
        h.reconcile().await.unwrap();
        let second = h.status();

        assert_eq!(first.targets_checked, second.targets_checked);
        assert_eq!(first.targets_unsealed, second.targets_unsealed);
        assert_eq!(first.conditions, second.conditions);
        assert_eq!(h.vault.submitted("10.0.0.1").len(), 3);
        assert_eq!(h.vault.submitted("10.0.0.2").len(), 3);
    }

    #[tokio::test]
    async fn test_target_lists_reflect_only_latest_pass() {
        let mut policy = policy();
        policy.status = Some(UnsealPolicyStatus {
            targets_checked: names(&["old-0", "old-1"]),
            targets_unsealed: names(&["old-0"]),
            ..UnsealPolicyStatus::default()
        });
        let h = Harness::new(
            policy,
            vec![target("vault-0", "10.0.0.1")],
            FakeVault::default().with_node("10.0.0.1", false, 3),
        );

        h.reconcile().await.unwrap();

        let status = h.status();
        assert_eq!(status.targets_checked, names(&["vault-0"]));
        assert_eq!(status.targets_unsealed, names(&["vault-0"]));
    }

    #[tokio::test]
    async fn test_policy_interval_is_used_for_requeue() {
        let mut policy = policy();
        policy.spec.interval = Some("5m".to_string());
        let h = Harness::new(
            policy,
            vec![target("vault-0", "10.0.0.1")],
            FakeVault::default().with_node("10.0.0.1", false, 3),
        );
        assert_eq!(
            h.reconcile().await.unwrap(),
            Requeue::After(Duration::from_secs(300))
        );

        let mut policy = self::policy();
        policy.spec.interval = Some("-1s".to_string());
        let h = Harness::new(
            policy,
            vec![target("vault-0", "10.0.0.1")],
            FakeVault::default().with_node("10.0.0.1", false, 3),
        );
        assert_eq!(h.reconcile().await.unwrap(), Requeue::After(DEFAULT_INTERVAL));
    }

    // ---- lifecycle ----

    #[tokio::test]
    async fn test_missing_policy_is_noop() {
        let h = Harness::new(policy(), vec![], FakeVault::default());
        *h.policies.policy.lock().unwrap() = None;

        assert_eq!(h.reconcile().await.unwrap(), Requeue::AwaitChange);
        assert!(h.policies.status_patches.lock().unwrap().is_empty());
        assert!(h.metrics.reconciles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_pass_only_adds_finalizer() {
        let mut policy = policy();
        policy.metadata.finalizers = None;
        let h = Harness::new(
            policy,
            vec![target("vault-0", "10.0.0.1")],
            FakeVault::default().with_node("10.0.0.1", true, 3),
        );

        assert_eq!(h.reconcile().await.unwrap(), Requeue::AwaitChange);
        let finalizers = h
            .policies
            .policy
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|p| p.metadata.finalizers.clone());
        assert_eq!(finalizers, Some(vec![FINALIZER.to_string()]));
        assert!(h.policies.status_patches.lock().unwrap().is_empty());
        assert!(h.targets.selectors.lock().unwrap().is_empty());
        assert_eq!(h.vault.status_calls("10.0.0.1"), 0);

        // The finalizer patch produces a new event; the next pass does the work
        h.reconcile().await.unwrap();
        assert_eq!(h.status().targets_unsealed, names(&["vault-0"]));
    }

    #[tokio::test]
    async fn test_deletion_forgets_metrics_and_removes_finalizer() {
        let mut policy = policy();
        policy.metadata.deletion_timestamp = Some(
            serde_json::from_value::<Time>(serde_json::json!("2024-01-01T00:00:00Z")).unwrap(),
        );
        policy.status = Some(UnsealPolicyStatus {
            targets_checked: names(&["vault-0", "vault-1"]),
            targets_unsealed: names(&["vault-1"]),
            ..UnsealPolicyStatus::default()
        });
        let h = Harness::new(
            policy,
            vec![target("vault-0", "10.0.0.1")],
            FakeVault::default().with_node("10.0.0.1", true, 3),
        );

        assert_eq!(h.reconcile().await.unwrap(), Requeue::AwaitChange);

        assert_eq!(
            *h.metrics.forgotten.lock().unwrap(),
            vec![names(&["vault-0", "vault-1"])]
        );
        assert!(h.policies.policy.lock().unwrap().is_none());
        assert!(h.metrics.reconciles.lock().unwrap().is_empty());
        assert_eq!(h.vault.status_calls("10.0.0.1"), 0);
    }

    #[tokio::test]
    async fn test_deleting_without_finalizer_is_noop() {
        let mut policy = policy();
        policy.metadata.finalizers = Some(vec!["other.io/guard".to_string()]);
        policy.metadata.deletion_timestamp = Some(
            serde_json::from_value::<Time>(serde_json::json!("2024-01-01T00:00:00Z")).unwrap(),
        );
        let h = Harness::new(policy, vec![], FakeVault::default());

        assert_eq!(h.reconcile().await.unwrap(), Requeue::AwaitChange);
        assert!(h.metrics.forgotten.lock().unwrap().is_empty());
        let finalizers = h
            .policies
            .policy
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|p| p.metadata.finalizers.clone());
        assert_eq!(finalizers, Some(vec!["other.io/guard".to_string()]));
    }
}
