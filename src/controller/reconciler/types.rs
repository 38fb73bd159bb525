//! # Reconciler Types
//!
//! Core types for the reconciliation engine.

use crate::controller::keys::{KeyLoadError, SecretStore};
use crate::controller::selector::SelectorError;
use crate::controller::targets::TargetLister;
use crate::controller::unseal::{UnsealConnector, UnsealError};
use crate::crd::{UnsealPolicy, UnsealPolicyStatus};
use crate::observability::MetricsSink;
use async_trait::async_trait;
use kube::ResourceExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Namespace and name of an `UnsealPolicy`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyId {
    pub namespace: String,
    pub name: String,
}

impl PolicyId {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl From<&UnsealPolicy> for PolicyId {
    fn from(policy: &UnsealPolicy) -> Self {
        Self::new(policy.namespace().unwrap_or_default(), policy.name_any())
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// When the policy should be reconciled next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    After(Duration),
    /// Only on the next watch event for the policy
    AwaitChange,
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("failed to read policy: {0}")]
    PolicyAccess(#[source] anyhow::Error),
    #[error("failed to update finalizer: {0}")]
    Finalizer(#[source] anyhow::Error),
    #[error("invalid target selector: {0}")]
    InvalidSelector(#[from] SelectorError),
    #[error("failed to list targets: {0}")]
    ListTargets(#[source] anyhow::Error),
    #[error("failed to load unseal keys: {0}")]
    KeyLoad(#[from] KeyLoadError),
    #[error(transparent)]
    ClientConfiguration(UnsealError),
    #[error("failed to update status: {0}")]
    StatusUpdate(#[source] anyhow::Error),
}

/// A failed pass, with the delay the engine would have used had it succeeded
///
/// The runtime error policy requeues at the shorter of its own backoff and
/// `requeue_after`.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct PassError {
    #[source]
    pub source: ReconcilerError,
    pub requeue_after: Option<Duration>,
    /// Set when the failure could not be written to the policy's status
    pub status_error: Option<String>,
}

impl PassError {
    #[must_use]
    pub fn at_interval(source: ReconcilerError, interval: Duration) -> Self {
        Self {
            source,
            requeue_after: Some(interval),
            status_error: None,
        }
    }

    #[must_use]
    pub fn with_status_error(mut self, status_error: impl Into<String>) -> Self {
        self.status_error = Some(status_error.into());
        self
    }
}

impl From<ReconcilerError> for PassError {
    fn from(source: ReconcilerError) -> Self {
        Self {
            source,
            requeue_after: None,
            status_error: None,
        }
    }
}

/// Read and write access to `UnsealPolicy` objects
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// `Ok(None)` when the policy no longer exists
    async fn get(&self, id: &PolicyId) -> anyhow::Result<Option<UnsealPolicy>>;

    async fn add_finalizer(&self, policy: &UnsealPolicy) -> anyhow::Result<()>;

    async fn remove_finalizer(&self, policy: &UnsealPolicy) -> anyhow::Result<()>;

    async fn patch_status(&self, id: &PolicyId, status: &UnsealPolicyStatus) -> anyhow::Result<()>;
}

/// Reconciliation engine
///
/// Holds the collaborators shared by every pass. Passes for different
/// policies may run concurrently on the same `Reconciler`.
#[derive(Clone)]
pub struct Reconciler {
    pub(crate) policies: Arc<dyn PolicyStore>,
    pub(crate) targets: Arc<dyn TargetLister>,
    pub(crate) secrets: Arc<dyn SecretStore>,
    pub(crate) connector: Arc<dyn UnsealConnector>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) default_interval: Duration,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        policies: Arc<dyn PolicyStore>,
        targets: Arc<dyn TargetLister>,
        secrets: Arc<dyn SecretStore>,
        connector: Arc<dyn UnsealConnector>,
        metrics: Arc<dyn MetricsSink>,
        default_interval: Duration,
    ) -> Self {
        Self {
            policies,
            targets,
            secrets,
            connector,
            metrics,
            default_interval,
        }
    }

    #[must_use]
    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("default_interval", &self.default_interval)
            .finish_non_exhaustive()
    }
}
