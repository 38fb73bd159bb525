//! # Vault HTTP Client
//!
//! `reqwest` implementation of the unseal API.
//!
//! - `GET  {endpoint}/v1/sys/seal-status`
//! - `POST {endpoint}/v1/sys/unseal` with body `{"key": "<share>"}`
//!
//! Non-2xx responses become `UnsealError::Status` carrying the response body.
//!
//! TLS uses rustls. The policy's CA bundle is added to the root store, and
//! `insecureSkipVerify` disables certificate validation entirely.

use crate::controller::unseal::{SealState, TlsSettings, UnsealApi, UnsealConnector, UnsealError};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const SEAL_STATUS_PATH: &str = "/v1/sys/seal-status";
const UNSEAL_PATH: &str = "/v1/sys/unseal";

#[derive(Serialize)]
struct UnsealRequest<'a> {
    key: &'a str,
}

/// Vault client for the seal-status and unseal endpoints
#[derive(Debug, Clone)]
pub struct VaultHttpClient {
    client: reqwest::Client,
}

impl VaultHttpClient {
    /// Build a client with the given TLS trust and per-request timeout
    ///
    /// # Errors
    ///
    /// Returns `UnsealError::ClientConfiguration` when the CA bundle is not
    /// valid PEM or the TLS backend cannot be initialized.
    pub fn new(tls: &TlsSettings, timeout: Duration) -> Result<Self, UnsealError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);

        if let Some(pem) = &tls.ca_bundle_pem {
            let certs = reqwest::Certificate::from_pem_bundle(pem).map_err(|e| {
                UnsealError::ClientConfiguration(format!("invalid CA bundle: {e}"))
            })?;
            if certs.is_empty() {
                return Err(UnsealError::ClientConfiguration(
                    "CA bundle contains no certificates".to_string(),
                ));
            }
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if tls.insecure_skip_verify {
            warn!("TLS certificate verification is disabled for Vault connections");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| UnsealError::ClientConfiguration(e.to_string()))?;
        Ok(Self { client })
    }

    async fn decode(url: &str, response: reqwest::Response) -> Result<SealState, UnsealError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UnsealError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<SealState>()
            .await
            .map_err(|e| UnsealError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

fn transport_error(url: &str, e: &reqwest::Error) -> UnsealError {
    let message = if e.is_timeout() {
        format!("timed out: {e}")
    } else {
        e.to_string()
    };
    UnsealError::Transport {
        url: url.to_string(),
        message,
    }
}

#[async_trait]
impl UnsealApi for VaultHttpClient {
    async fn seal_status(&self, endpoint: &str) -> Result<SealState, UnsealError> {
        let url = format!("{endpoint}{SEAL_STATUS_PATH}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(&url, &e))?;
        Self::decode(&url, response).await
    }

    async fn submit_key(&self, endpoint: &str, key: &str) -> Result<SealState, UnsealError> {
        let url = format!("{endpoint}{UNSEAL_PATH}");
        let response = self
            .client
            .post(&url)
            .json(&UnsealRequest { key })
            .send()
            .await
            .map_err(|e| transport_error(&url, &e))?;
        Self::decode(&url, response).await
    }
}

/// Connector producing a `VaultHttpClient` per pass
#[derive(Debug, Clone)]
pub struct HttpConnector {
    timeout: Duration,
}

impl HttpConnector {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl UnsealConnector for HttpConnector {
    fn connect(&self, tls: &TlsSettings) -> Result<Arc<dyn UnsealApi>, UnsealError> {
        Ok(Arc::new(VaultHttpClient::new(tls, self.timeout)?))
    }
}
