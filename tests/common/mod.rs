//! Common test utilities for integration tests
//!
//! Provides rustls crypto provider setup and helpers shared by the Pact tests.

use std::sync::Once;

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
///
/// Uses a `Once` so every test in the binary can call it.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        // Another test binary helper may already have installed it
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Mock server URL without the trailing slash
pub fn base_url(url: &impl ToString) -> String {
    let mut base = url.to_string();
    if base.ends_with('/') {
        base.pop();
    }
    base
}
