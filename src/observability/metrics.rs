//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `vault_unseal_reconciliations_total` - Reconcile passes by policy and outcome
//! - `vault_unseal_reconciliation_duration_seconds` - Duration of reconcile passes
//! - `vault_unseal_attempts_total` - Per-target unseal attempts by outcome
//! - `vault_unseal_target_sealed` - 1 when a target was last seen sealed, 0 otherwise
//! - `vault_unseal_keys_loaded` - Keys loaded for a policy in the last pass
//! - `vault_unseal_targets_discovered` - Targets matched by a policy's selector
//!
//! The registry is owned by `PrometheusMetrics`; nothing is registered globally.

use anyhow::{Context, Result};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::time::Duration;
use tracing::debug;

/// Reconcile pass outcome labels
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_ERROR: &str = "error";

/// Per-target unseal attempt outcome labels
pub const ATTEMPT_UNSEALED: &str = "unsealed";
pub const ATTEMPT_SEALED: &str = "sealed";
pub const ATTEMPT_ERROR: &str = "error";
pub const ATTEMPT_SKIPPED: &str = "skipped";

/// Destination for controller metrics
///
/// Shared by every concurrent reconcile, so implementations must be
/// internally synchronized.
pub trait MetricsSink: Send + Sync {
    fn observe_reconcile(&self, policy: &str, namespace: &str, outcome: &str, elapsed: Duration);

    fn record_unseal_attempt(&self, policy: &str, namespace: &str, target: &str, outcome: &str);

    fn set_target_sealed(&self, policy: &str, namespace: &str, target: &str, sealed: bool);

    fn set_keys_loaded(&self, policy: &str, namespace: &str, count: usize);

    fn set_targets_discovered(&self, policy: &str, namespace: &str, count: usize);

    /// Drop every series recorded for a policy and the given targets
    fn forget(&self, policy: &str, namespace: &str, targets: &[String]);
}

/// Prometheus-backed metrics sink
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    reconcile_duration: HistogramVec,
    unseal_attempts: IntCounterVec,
    target_sealed: IntGaugeVec,
    keys_loaded: IntGaugeVec,
    targets_discovered: IntGaugeVec,
}

impl PrometheusMetrics {
    /// Create and register all metrics in a fresh registry
    ///
    /// # Errors
    ///
    /// Returns an error if a metric definition is invalid or registered twice.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "vault_unseal_reconciliations_total",
                "Total number of reconcile passes",
            ),
            &["policy", "namespace", "outcome"],
        )?;
        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                "vault_unseal_reconciliation_duration_seconds",
                "Duration of reconcile passes in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
            &["policy", "namespace", "outcome"],
        )?;
        let unseal_attempts = IntCounterVec::new(
            Opts::new(
                "vault_unseal_attempts_total",
                "Total number of per-target unseal attempts",
            ),
            &["policy", "namespace", "target", "outcome"],
        )?;
        let target_sealed = IntGaugeVec::new(
            Opts::new(
                "vault_unseal_target_sealed",
                "Whether a target was sealed after the last attempt (1 = sealed)",
            ),
            &["policy", "namespace", "target"],
        )?;
        let keys_loaded = IntGaugeVec::new(
            Opts::new(
                "vault_unseal_keys_loaded",
                "Number of unseal keys loaded in the last pass",
            ),
            &["policy", "namespace"],
        )?;
        let targets_discovered = IntGaugeVec::new(
            Opts::new(
                "vault_unseal_targets_discovered",
                "Number of targets matched by the selector in the last pass",
            ),
            &["policy", "namespace"],
        )?;

        registry
            .register(Box::new(reconciliations.clone()))
            .context("Failed to register reconciliations metric")?;
        registry
            .register(Box::new(reconcile_duration.clone()))
            .context("Failed to register reconcile duration metric")?;
        registry
            .register(Box::new(unseal_attempts.clone()))
            .context("Failed to register unseal attempts metric")?;
        registry
            .register(Box::new(target_sealed.clone()))
            .context("Failed to register target sealed metric")?;
        registry
            .register(Box::new(keys_loaded.clone()))
            .context("Failed to register keys loaded metric")?;
        registry
            .register(Box::new(targets_discovered.clone()))
            .context("Failed to register targets discovered metric")?;

        Ok(Self {
            registry,
            reconciliations,
            reconcile_duration,
            unseal_attempts,
            target_sealed,
            keys_loaded,
            targets_discovered,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text exposition format
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics output is not valid UTF-8")
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

const OUTCOMES: [&str; 2] = [OUTCOME_SUCCESS, OUTCOME_ERROR];
const ATTEMPT_OUTCOMES: [&str; 4] = [ATTEMPT_UNSEALED, ATTEMPT_SEALED, ATTEMPT_ERROR, ATTEMPT_SKIPPED];

impl MetricsSink for PrometheusMetrics {
    fn observe_reconcile(&self, policy: &str, namespace: &str, outcome: &str, elapsed: Duration) {
        self.reconciliations
            .with_label_values(&[policy, namespace, outcome])
            .inc();
        self.reconcile_duration
            .with_label_values(&[policy, namespace, outcome])
            .observe(elapsed.as_secs_f64());
    }

    fn record_unseal_attempt(&self, policy: &str, namespace: &str, target: &str, outcome: &str) {
        self.unseal_attempts
            .with_label_values(&[policy, namespace, target, outcome])
            .inc();
    }

    fn set_target_sealed(&self, policy: &str, namespace: &str, target: &str, sealed: bool) {
        self.target_sealed
            .with_label_values(&[policy, namespace, target])
            .set(i64::from(sealed));
    }

    fn set_keys_loaded(&self, policy: &str, namespace: &str, count: usize) {
        self.keys_loaded
            .with_label_values(&[policy, namespace])
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    fn set_targets_discovered(&self, policy: &str, namespace: &str, count: usize) {
        self.targets_discovered
            .with_label_values(&[policy, namespace])
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    fn forget(&self, policy: &str, namespace: &str, targets: &[String]) {
        // Removing a series that was never recorded returns an error; ignore it.
        for outcome in OUTCOMES {
            let _ = self
                .reconciliations
                .remove_label_values(&[policy, namespace, outcome]);
            let _ = self
                .reconcile_duration
                .remove_label_values(&[policy, namespace, outcome]);
        }
        for target in targets {
            for outcome in ATTEMPT_OUTCOMES {
                let _ = self
                    .unseal_attempts
                    .remove_label_values(&[policy, namespace, target, outcome]);
            }
            let _ = self
                .target_sealed
                .remove_label_values(&[policy, namespace, target]);
        }
        let _ = self.keys_loaded.remove_label_values(&[policy, namespace]);
        let _ = self
            .targets_discovered
            .remove_label_values(&[policy, namespace]);
        debug!(policy = %policy, namespace = %namespace, targets = targets.len(), "Metrics series removed");
    }
}
