//! # Watch Loop
//!
//! Controller watch loop that monitors `UnsealPolicy` resources and triggers
//! reconciliation when they, their Vault pods, or their key Secrets change.

use crate::controller::reconciler::{PassError, PolicyId, Reconciler, Requeue};
use crate::controller::selector::LabelSelector;
use crate::crd::UnsealPolicy;
use crate::runtime::error_policy::{handle_reconciliation_error, BackoffStates};
use crate::server::ServerState;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::Api;
use kube::{Client, ResourceExt};
use kube_runtime::controller::{self, Action};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Shared state handed to every reconcile and error policy call
#[derive(Debug)]
pub struct ControllerContext {
    pub reconciler: Reconciler,
    pub backoff: BackoffStates,
}

/// Which namespaces the controller watches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WatchScope {
    #[default]
    AllNamespaces,
    Namespace(String),
}

impl WatchScope {
    #[must_use]
    pub fn from_option(namespace: Option<String>) -> Self {
        match namespace {
            Some(ns) if !ns.is_empty() => Self::Namespace(ns),
            _ => Self::AllNamespaces,
        }
    }

    fn api<K>(&self, client: Client) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        match self {
            Self::AllNamespaces => Api::all(client),
            Self::Namespace(ns) => Api::namespaced(client, ns),
        }
    }
}

/// Run the controller until a shutdown signal arrives
///
/// Marks the server as not ready as soon as shutdown begins, then waits for
/// in-flight reconciliations to finish.
pub async fn run_watch_loop(
    client: Client,
    scope: WatchScope,
    context: Arc<ControllerContext>,
    server_state: Arc<ServerState>,
    concurrency: u16,
) -> anyhow::Result<()> {
    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.set_ready(false);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    info!(scope = ?scope, concurrency, "Starting controller watch loop...");

    let policies: Api<UnsealPolicy> = scope.api(client.clone());
    let pods: Api<Pod> = scope.api(client.clone());
    let secrets: Api<Secret> = scope.api(client);

    let controller = Controller::new(policies, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().concurrency(concurrency));
    let pod_store = controller.store();
    let secret_store = controller.store();

    controller
        .watches(pods, watcher::Config::default(), move |pod: Pod| {
            policies_selecting_pod(&pod_store.state(), &pod)
        })
        .watches(secrets, watcher::Config::default(), move |secret: Secret| {
            policies_referencing_secret(&secret_store.state(), &secret)
        })
        .shutdown_on_signal()
        .run(reconcile_policy, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    debug!(policy = %object, action = ?action, "watch.event.reconciled");
                }
                Err(e) => {
                    warn!(error = %e, "watch.event.error");
                }
            }
        })
        .instrument(tracing::info_span!("controller.watch", operation = "watch_loop"))
        .await;

    server_state.set_ready(false);
    info!("Controller stopped gracefully");
    Ok(())
}

async fn reconcile_policy(
    policy: Arc<UnsealPolicy>,
    context: Arc<ControllerContext>,
) -> Result<Action, PassError> {
    let id = PolicyId::from(policy.as_ref());
    let requeue = context.reconciler.reconcile(&id).await?;
    context.backoff.reset(&id);
    Ok(to_action(requeue))
}

fn error_policy(policy: Arc<UnsealPolicy>, error: &PassError, context: Arc<ControllerContext>) -> Action {
    let id = PolicyId::from(policy.as_ref());
    Action::requeue(handle_reconciliation_error(&id, error, &context.backoff))
}

fn to_action(requeue: Requeue) -> Action {
    match requeue {
        Requeue::After(delay) => Action::requeue(delay),
        Requeue::AwaitChange => Action::await_change(),
    }
}

/// Policies in the pod's namespace whose target selector matches its labels
///
/// Policies with an unparseable selector match nothing here; their own
/// reconcile reports the error.
pub fn policies_selecting_pod(
    policies: &[Arc<UnsealPolicy>],
    pod: &Pod,
) -> Vec<ObjectRef<UnsealPolicy>> {
    let pod_namespace = pod.namespace().unwrap_or_default();
    policies
        .iter()
        .filter(|policy| policy.namespace().unwrap_or_default() == pod_namespace)
        .filter(|policy| {
            LabelSelector::parse(&policy.spec.target_selector)
                .is_ok_and(|selector| selector.matches(pod.labels()))
        })
        .map(|policy| ObjectRef::from_obj(policy.as_ref()))
        .collect()
}

/// Policies that read keys or a CA bundle from the secret
pub fn policies_referencing_secret(
    policies: &[Arc<UnsealPolicy>],
    secret: &Secret,
) -> Vec<ObjectRef<UnsealPolicy>> {
    let secret_namespace = secret.namespace().unwrap_or_default();
    let secret_name = secret.name_any();
    policies
        .iter()
        .filter(|policy| {
            let policy_namespace = policy.namespace().unwrap_or_default();
            let key_source = policy.spec.key_sources.iter().any(|source| {
                source.name == secret_name && source.namespace_or(&policy_namespace) == secret_namespace
            });
            let ca_bundle = policy.spec.connection.ca_bundle_ref.as_ref().is_some_and(|ca| {
                let ca_namespace = match ca.namespace.as_deref() {
                    Some(ns) if !ns.is_empty() => ns,
                    _ => policy_namespace.as_str(),
                };
                ca.name == secret_name && ca_namespace == secret_namespace
            });
            key_source || ca_bundle
        })
        .map(|policy| ObjectRef::from_obj(policy.as_ref()))
        .collect()
}
