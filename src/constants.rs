//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default interval between reconcile passes when a policy does not set one (seconds)
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;

/// Default timeout for a single Vault API request (seconds)
pub const DEFAULT_VAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default exponential backoff starting value after a failed pass (seconds)
pub const DEFAULT_BACKOFF_START_SECS: u64 = 5;

/// Default exponential backoff maximum value (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default limit on simultaneous reconciliations across policies
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Port Vault listens on when the connection URL carries no scheme
pub const DEFAULT_VAULT_PORT: u16 = 8200;

/// Placeholder in the connection URL replaced by each target's address
pub const ADDRESS_PLACEHOLDER: &str = "{address}";

/// Finalizer guarding metric cleanup before a policy is removed
pub const FINALIZER: &str = "unseal.octopilot.io/finalizer";

/// Field manager name used for status and metadata patches
pub const FIELD_MANAGER: &str = "vault-unseal-controller";

/// Key read from the CA bundle secret when the policy does not name one
pub const DEFAULT_CA_BUNDLE_KEY: &str = "ca.crt";
