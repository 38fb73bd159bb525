//! # Error Policy
//!
//! Requeue decisions for failed reconcile passes.
//!
//! Backoff state is tracked per policy so one failing policy never delays
//! another. A successful pass resets that policy's backoff.

use crate::config::ControllerConfig;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::reconciler::{PassError, PolicyId};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

/// Per-policy exponential backoff
#[derive(Debug)]
pub struct BackoffStates {
    start: Duration,
    max: Duration,
    states: Mutex<HashMap<PolicyId, ExponentialBackoff>>,
}

impl BackoffStates {
    #[must_use]
    pub fn new(start: Duration, max: Duration) -> Self {
        Self {
            start,
            max,
            states: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(config.backoff_start(), config.backoff_max())
    }

    /// Advance the policy's backoff and return the delay to use
    pub fn next_delay(&self, id: &PolicyId) -> Duration {
        match self.states.lock() {
            Ok(mut states) => states
                .entry(id.clone())
                .or_insert_with(|| ExponentialBackoff::new(self.start, self.max))
                .next_backoff(),
            Err(e) => {
                warn!("Failed to lock backoff states: {}, using start delay", e);
                self.start
            }
        }
    }

    /// Forget the policy's failures
    pub fn reset(&self, id: &PolicyId) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(id);
        }
    }
}

/// Decide the requeue delay after a failed pass
///
/// The delay is the policy's next backoff, but never later than the interval
/// the pass itself reported.
pub fn handle_reconciliation_error(id: &PolicyId, error: &PassError, backoff: &BackoffStates) -> Duration {
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = id.name.as_str(),
        resource.namespace = id.namespace.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}: {}", id, error);
    if let Some(status_error) = &error.status_error {
        error!("Status of {} does not show this failure: {}", id, status_error);
    }

    let backoff_delay = backoff.next_delay(id);
    let delay = match error.requeue_after {
        Some(hint) => backoff_delay.min(hint),
        None => backoff_delay,
    };

    info!(
        "🔄 Retrying in {}s (backoff {}s, interval hint {:?})",
        delay.as_secs(),
        backoff_delay.as_secs(),
        error.requeue_after.map(|d| d.as_secs())
    );
    delay
}
