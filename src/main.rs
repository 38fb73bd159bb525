//! # Vault Unseal Controller
//!
//! Entry point: initializes the runtime and runs the watch loop until shutdown.

use anyhow::Result;
use vault_unseal_controller::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(
        init.client,
        init.scope,
        init.context,
        init.server_state,
        init.config.max_concurrent_reconciliations,
    )
    .await
}
