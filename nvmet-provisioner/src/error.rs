use thiserror::Error;

use crate::config::ConfigError;

/// Errors that abort a provisioning run.
///
/// Everything else is recorded in the run report and does not stop the run.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to load kernel module '{module}': {reason}")]
    ModuleLoad { module: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
