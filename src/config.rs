//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Port for the metrics and probe HTTP server
    pub metrics_port: u16,
    /// How long startup waits for the HTTP server to bind (seconds)
    pub server_startup_timeout_secs: u64,
    /// Interval used when a policy does not declare one (seconds)
    pub default_reconcile_interval_secs: u64,
    /// Timeout applied to every Vault API request (seconds)
    pub vault_request_timeout_secs: u64,
    /// First delay applied by the error policy after a failed pass (seconds)
    pub backoff_start_secs: u64,
    /// Upper bound for the error policy delay (seconds)
    pub backoff_max_secs: u64,
    /// Maximum concurrent reconciliations
    /// Limits how many policies can be reconciled simultaneously
    pub max_concurrent_reconciliations: u16,
    /// Restrict the controller to one namespace; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::{
            DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_START_SECS,
            DEFAULT_MAX_CONCURRENT_RECONCILIATIONS, DEFAULT_METRICS_PORT,
            DEFAULT_RECONCILE_INTERVAL_SECS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            DEFAULT_VAULT_REQUEST_TIMEOUT_SECS,
        };
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            server_startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            default_reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            vault_request_timeout_secs: DEFAULT_VAULT_REQUEST_TIMEOUT_SECS,
            backoff_start_secs: DEFAULT_BACKOFF_START_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            watch_namespace: None,
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// Unparseable values fall back to their defaults rather than failing startup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            metrics_port: parse_or(&lookup, "METRICS_PORT", defaults.metrics_port),
            server_startup_timeout_secs: parse_or(
                &lookup,
                "SERVER_STARTUP_TIMEOUT_SECS",
                defaults.server_startup_timeout_secs,
            ),
            default_reconcile_interval_secs: positive_or(
                &lookup,
                "DEFAULT_RECONCILE_INTERVAL_SECS",
                defaults.default_reconcile_interval_secs,
            ),
            vault_request_timeout_secs: positive_or(
                &lookup,
                "VAULT_REQUEST_TIMEOUT_SECS",
                defaults.vault_request_timeout_secs,
            ),
            backoff_start_secs: positive_or(
                &lookup,
                "BACKOFF_START_SECS",
                defaults.backoff_start_secs,
            ),
            backoff_max_secs: positive_or(&lookup, "BACKOFF_MAX_SECS", defaults.backoff_max_secs),
            max_concurrent_reconciliations: parse_or(
                &lookup,
                "MAX_CONCURRENT_RECONCILIATIONS",
                defaults.max_concurrent_reconciliations,
            ),
            watch_namespace: lookup("WATCH_NAMESPACE")
                .map(|ns| ns.trim().to_string())
                .filter(|ns| !ns.is_empty()),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT").unwrap_or(defaults.log_format),
        }
    }

    /// Get the default reconcile interval
    #[must_use]
    pub fn default_reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.default_reconcile_interval_secs)
    }

    /// Get the Vault request timeout
    #[must_use]
    pub fn vault_request_timeout(&self) -> Duration {
        Duration::from_secs(self.vault_request_timeout_secs)
    }

    /// Get backoff start duration
    #[must_use]
    pub fn backoff_start(&self) -> Duration {
        Duration::from_secs(self.backoff_start_secs)
    }

    /// Get backoff max duration
    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs.max(self.backoff_start_secs))
    }

    /// Get the HTTP server startup timeout
    #[must_use]
    pub fn server_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.server_startup_timeout_secs)
    }
}

/// Read a value or return the default when missing or unparseable
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Like `parse_or`, but zero is treated as unset
fn positive_or<F>(lookup: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, key, default) {
        0 => default,
        value => value,
    }
}
