//! Sandbox backends
//!
//! - `process`: fresh interpreter process per run (default), jailed in
//!   fresh namespaces where the host allows
//! - `isolate_box`: IOI isolate boxes with cgroups

mod config;
pub mod isolate_box;
mod meta;
pub mod namespace;
pub mod process;

#[cfg(test)]
pub(crate) mod fake;

use std::sync::Arc;

use tracing::info;

use crate::core::config::{EngineConfig, SandboxBackend};
use crate::core::error::SandboxLaunchError;
use crate::engine::executer::Sandbox;

pub use isolate_box::IsolateSandbox;
pub use process::ProcessSandbox;

/// Build the configured backend
pub async fn build_sandbox(
    config: &EngineConfig,
    worker_id: u32,
) -> Result<Arc<dyn Sandbox>, SandboxLaunchError> {
    match config.backend {
        SandboxBackend::Process => {
            let sandbox = ProcessSandbox::from_config(config);
            // Check now so a missing jail is reported at startup
            let jailed = sandbox.jailed().await?;
            info!(worker_id, jailed, "using process sandbox");
            Ok(Arc::new(sandbox))
        }
        SandboxBackend::Isolate => Ok(Arc::new(
            IsolateSandbox::from_config(config, worker_id).await?,
        )),
    }
}
