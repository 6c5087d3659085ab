//! Kernel module loading.

use tracing::{info, instrument};

use crate::command::CommandRunner;
use crate::error::{ProvisionError, Result};

/// Modules needed for an NVMe/TCP target.
pub const DEFAULT_MODULES: &[&str] = &["nvme_tcp", "nvmet", "nvmet-tcp"];

/// Load every module with `modprobe`, in order.
///
/// The first failure aborts: later steps assume all modules are present.
#[instrument(skip(runner))]
pub async fn load_modules<R: CommandRunner>(runner: &R, modules: &[String]) -> Result<()> {
    info!("Loading kernel modules...");
    for module in modules {
        let output = runner
            .run("modprobe", &[module.as_str()])
            .await
            .map_err(|e| ProvisionError::ModuleLoad {
                module: module.clone(),
                reason: e.to_string(),
            })?;
        output
            .check(&format!("modprobe {}", module))
            .map_err(|reason| ProvisionError::ModuleLoad {
                module: module.clone(),
                reason,
            })?;
        info!(module = %module, "Kernel module loaded");
    }
    Ok(())
}
