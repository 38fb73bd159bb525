//! # Unseal Protocol
//!
//! Checks a target's seal status and submits key shares until it reports
//! unsealed or the shares run out.
//!
//! The protocol is written against the `UnsealApi` trait so the engine and its
//! tests never depend on a concrete HTTP client. `VaultHttpClient` in
//! `controller::vault` is the production implementation.

use crate::constants::{ADDRESS_PLACEHOLDER, DEFAULT_VAULT_PORT};
use crate::controller::keys::KeyMaterial;
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Seal status as reported by `sys/seal-status` and `sys/unseal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SealState {
    pub sealed: bool,
    /// Number of shares required to unseal
    #[serde(rename = "t", default)]
    pub threshold: u32,
    /// Total number of shares
    #[serde(rename = "n", default)]
    pub total_shares: u32,
    /// Shares accepted so far in the current unseal attempt
    #[serde(default)]
    pub progress: u32,
}

/// Unseal protocol errors
#[derive(Debug, Error)]
pub enum UnsealError {
    #[error("cannot derive endpoint from '{template}' for address '{address}': {reason}")]
    InvalidEndpoint {
        template: String,
        address: String,
        reason: String,
    },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },
    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("failed to configure Vault client: {0}")]
    ClientConfiguration(String),
}

/// Remote unseal API of a single Vault instance
#[async_trait]
pub trait UnsealApi: Send + Sync {
    async fn seal_status(&self, endpoint: &str) -> Result<SealState, UnsealError>;

    async fn submit_key(&self, endpoint: &str, key: &str) -> Result<SealState, UnsealError>;
}

/// TLS trust used when talking to Vault
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    /// Extra PEM root certificates
    pub ca_bundle_pem: Option<Vec<u8>>,
    pub insecure_skip_verify: bool,
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("ca_bundle_bytes", &self.ca_bundle_pem.as_ref().map(Vec::len))
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

/// Builds an `UnsealApi` client for a set of TLS settings
pub trait UnsealConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns `UnsealError::ClientConfiguration` when the client cannot be built.
    fn connect(&self, tls: &TlsSettings) -> Result<Arc<dyn UnsealApi>, UnsealError>;
}

/// Result of unsealing one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsealOutcome {
    pub sealed: bool,
    pub keys_submitted: usize,
    /// Progress reported by the last response
    pub progress: u32,
}

/// Derive the base URL for a target from the policy's connection template
///
/// - `{address}` in the template is replaced by the target address
/// - a template with a scheme keeps its scheme and port with the host replaced
/// - a scheme-less result gets `http://` and, without an explicit port, 8200
/// - anything else connects to `http://<address>:8200`
///
/// The result is always an origin. Template paths are dropped because the
/// client appends the full `/v1/sys/...` path itself.
///
/// # Errors
///
/// Returns `UnsealError::InvalidEndpoint` when the result is not a valid URL.
pub fn derive_endpoint(template: &str, address: &str) -> Result<String, UnsealError> {
    let template = template.trim();
    let host = url_host(address);
    let invalid = |reason: String| UnsealError::InvalidEndpoint {
        template: template.to_string(),
        address: address.to_string(),
        reason,
    };

    let mut url = if template.contains(ADDRESS_PLACEHOLDER) {
        let substituted = template.replace(ADDRESS_PLACEHOLDER, &host);
        if substituted.contains("://") {
            Url::parse(&substituted).map_err(|e| invalid(e.to_string()))?
        } else {
            let mut url = Url::parse(&format!("http://{substituted}"))
                .map_err(|e| invalid(e.to_string()))?;
            if !has_explicit_port(&substituted) {
                url.set_port(Some(DEFAULT_VAULT_PORT))
                    .map_err(|()| invalid("cannot set default port".to_string()))?;
            }
            url
        }
    } else if template.contains("://") {
        let mut url = Url::parse(template).map_err(|e| invalid(e.to_string()))?;
        url.set_host(Some(&host))
            .map_err(|e| invalid(e.to_string()))?;
        url
    } else {
        Url::parse(&format!("http://{host}:{DEFAULT_VAULT_PORT}"))
            .map_err(|e| invalid(e.to_string()))?
    };

    url.set_path("");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Whether a scheme-less `host[:port][/path]` names a port
///
/// `Url::port` hides a port equal to the scheme default, so `:80` has to be
/// detected on the text.
fn has_explicit_port(authority_and_path: &str) -> bool {
    let authority = authority_and_path
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let after_host = authority.rsplit_once(']').map_or(authority, |(_, rest)| rest);
    after_host.contains(':')
}

/// Bracket IPv6 literals so they can be used as a URL host
fn url_host(address: &str) -> String {
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{v6}]"),
        _ => address.to_string(),
    }
}

/// Run the unseal protocol against one target
///
/// Keys are submitted in order, stopping as soon as a response reports the
/// target unsealed. Running out of keys while still sealed is not an error.
///
/// # Errors
///
/// Returns the first transport or decode error; remaining keys are not sent.
pub async fn unseal_target(
    api: &dyn UnsealApi,
    endpoint: &str,
    keys: &KeyMaterial,
) -> Result<UnsealOutcome, UnsealError> {
    let status = api.seal_status(endpoint).await?;
    let mut outcome = UnsealOutcome {
        sealed: status.sealed,
        keys_submitted: 0,
        progress: status.progress,
    };

    if !status.sealed {
        debug!(endpoint = %endpoint, "Target already unsealed");
        return Ok(outcome);
    }

    for key in keys.iter() {
        let state = api.submit_key(endpoint, key).await?;
        outcome.keys_submitted += 1;
        outcome.sealed = state.sealed;
        outcome.progress = state.progress;
        debug!(
            endpoint = %endpoint,
            progress = state.progress,
            threshold = state.threshold,
            "Submitted unseal key share"
        );
        if !state.sealed {
            break;
        }
    }

    Ok(outcome)
}
