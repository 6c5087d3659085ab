//! NVMe-oF target provisioning for Linux nvmet
//!
//! This library exports local block devices as NVMe over Fabrics subsystems
//! by driving the kernel's nvmet configfs tree.
//!
//! The library is split into several modules:
//! - `config`: run configuration (file, defaults, validation)
//! - `configfs`: configfs layout, identifiers and primitive operations
//! - `provision`: the provisioning sequence and its report
//! - `inspect`: reading the configured tree back
//! - `kmod`, `label`, `command`: external commands (modprobe, lsblk)
//! - `retry`: bounded retry for asynchronously created configfs entries

pub mod command;
pub mod config;
pub mod configfs;
pub mod error;
pub mod inspect;
pub mod kmod;
pub mod label;
pub mod provision;
pub mod retry;

pub use command::{CommandOutput, CommandRunner, SystemRunner};
pub use config::{CleanupScope, ConfigError, ProvisionConfig};
pub use configfs::{ConfigfsError, ConfigfsLayout, DriveUuid, SubsystemName};
pub use error::ProvisionError;
pub use provision::{ProvisionReport, Provisioner};
pub use retry::RetryPolicy;
