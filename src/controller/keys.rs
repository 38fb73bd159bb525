//! # Key Loader
//!
//! Resolves the policy's ordered key sources into a deduplicated,
//! threshold-capped list of unseal key shares.
//!
//! A secret field holds either a JSON array of strings or newline-separated
//! keys. Any missing secret, missing field, or malformed payload aborts the
//! whole load: a partial key set is never returned.

use crate::crd::KeyRef;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Read access to Kubernetes Secrets
///
/// `Ok(None)` means the secret does not exist. Every other access failure
/// (forbidden, transport) is an error.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<BTreeMap<String, Vec<u8>>>>;
}

/// Key loading errors
///
/// Messages name the secret and field but never the key contents.
#[derive(Debug, Error)]
pub enum KeyLoadError {
    #[error("secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },
    #[error("failed to read secret {namespace}/{name}: {source}")]
    SecretAccess {
        namespace: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("field '{field}' not found in secret {namespace}/{name}")]
    FieldNotFound {
        namespace: String,
        name: String,
        field: String,
    },
    #[error("field '{field}' in secret {namespace}/{name} is not valid UTF-8")]
    InvalidEncoding {
        namespace: String,
        name: String,
        field: String,
    },
    #[error("field '{field}' in secret {namespace}/{name} is not a JSON array of strings: {source}")]
    MalformedJson {
        namespace: String,
        name: String,
        field: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no unseal keys found in {0} key source(s)")]
    NoKeysFound(usize),
}

/// Ordered, deduplicated unseal key shares
///
/// Contents are wiped on drop and never printed.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    keys: Vec<String>,
}

impl KeyMaterial {
    /// Append `key` unless an identical key is already present
    pub fn push_unique(&mut self, key: String) -> bool {
        if self.keys.contains(&key) {
            let mut key = key;
            key.zeroize();
            return false;
        }
        self.keys.push(key);
        true
    }

    /// Keep only the first `threshold` keys; 0 (or negative) keeps everything
    pub fn truncate_to_threshold(&mut self, threshold: i32) {
        if let Ok(limit) = usize::try_from(threshold) {
            if limit > 0 && self.keys.len() > limit {
                for key in &mut self.keys[limit..] {
                    key.zeroize();
                }
                self.keys.truncate(limit);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("count", &self.keys.len())
            .finish_non_exhaustive()
    }
}

impl<S: Into<String>> FromIterator<S> for KeyMaterial {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut material = Self::default();
        for key in iter {
            material.push_unique(key.into());
        }
        material
    }
}

/// Load keys from every source in order
///
/// # Errors
///
/// Returns `KeyLoadError` when any source cannot be read or parsed, or when
/// no keys were found at all.
pub async fn load_keys(
    store: &dyn SecretStore,
    default_namespace: &str,
    sources: &[KeyRef],
    threshold: i32,
) -> Result<KeyMaterial, KeyLoadError> {
    let mut material = KeyMaterial::default();

    for source in sources {
        let namespace = source.namespace_or(default_namespace);
        let mut data = store
            .get_secret_data(namespace, &source.name)
            .await
            .map_err(|e| KeyLoadError::SecretAccess {
                namespace: namespace.to_string(),
                name: source.name.clone(),
                source: e,
            })?
            .ok_or_else(|| KeyLoadError::SecretNotFound {
                namespace: namespace.to_string(),
                name: source.name.clone(),
            })?;

        let raw = data.remove(&source.field).map(Zeroizing::new);
        wipe_secret_data(&mut data);
        let raw = raw.ok_or_else(|| KeyLoadError::FieldNotFound {
            namespace: namespace.to_string(),
            name: source.name.clone(),
            field: source.field.clone(),
        })?;

        let mut keys = parse_payload(namespace, source, raw.as_slice())?;
        for key in keys.drain(..) {
            material.push_unique(key);
        }
    }

    if material.is_empty() {
        return Err(KeyLoadError::NoKeysFound(sources.len()));
    }

    material.truncate_to_threshold(threshold);
    Ok(material)
}

/// Wipe every value of a secret's data map
///
/// Callers use this for fields they read alongside the key field.
pub fn wipe_secret_data(data: &mut BTreeMap<String, Vec<u8>>) {
    for value in data.values_mut() {
        value.zeroize();
    }
}

/// Split one field payload into keys
fn parse_payload(
    namespace: &str,
    source: &KeyRef,
    raw: &[u8],
) -> Result<Zeroizing<Vec<String>>, KeyLoadError> {
    let text = std::str::from_utf8(raw).map_err(|_| KeyLoadError::InvalidEncoding {
        namespace: namespace.to_string(),
        name: source.name.clone(),
        field: source.field.clone(),
    })?;
    let text = text.trim();

    if text.starts_with('[') && text.ends_with(']') {
        let parsed: Zeroizing<Vec<String>> =
            Zeroizing::new(serde_json::from_str(text).map_err(|e| KeyLoadError::MalformedJson {
                namespace: namespace.to_string(),
                name: source.name.clone(),
                field: source.field.clone(),
                source: e,
            })?);
        return Ok(Zeroizing::new(
            parsed
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect(),
        ));
    }

    Ok(Zeroizing::new(
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
    ))
}
