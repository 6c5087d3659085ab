//! NVMe-oF target provisioning through the nvmet configfs tree.
//!
//! A run loads the kernel modules, removes the previous configuration,
//! creates the listening port and exports every configured drive as its own
//! subsystem with a single namespace:
//!
//! ```text
//! ports/1/subsystems/<prefix><label|NN> -> subsystems/<prefix><label|NN>
//! subsystems/<prefix><label|NN>/namespaces/1/device_path = /dev/disk/by-uuid/<uuid>
//! ```
//!
//! Only a failed module load (or an invalid configuration) aborts a run.
//! Every other failure is logged, recorded in the [`ProvisionReport`] and the
//! run moves on to the next step or drive.

mod cleanup;
mod port;
pub mod report;
mod subsystem;

use std::collections::HashSet;

use tracing::{error, info, instrument, warn};

use crate::command::CommandRunner;
use crate::config::ProvisionConfig;
use crate::configfs::ConfigfsLayout;
use crate::error::Result;
use crate::kmod;

pub use report::{
    CleanupReport, DriveReport, NamespaceState, PortReport, ProvisionReport, StepStatus,
};

/// Applies a [`ProvisionConfig`] to the configfs tree.
pub struct Provisioner<R> {
    config: ProvisionConfig,
    layout: ConfigfsLayout,
    runner: R,
}

impl<R: CommandRunner> Provisioner<R> {
    /// Create a provisioner for a validated configuration.
    pub fn new(config: ProvisionConfig, runner: R) -> Result<Self> {
        config.validate()?;
        let layout = config.layout();

        info!(
            root = %layout.root().display(),
            drives = config.drives.len(),
            prefix = %config.subsystem_prefix,
            "Initializing provisioner"
        );

        Ok(Self {
            config,
            layout,
            runner,
        })
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    pub fn layout(&self) -> &ConfigfsLayout {
        &self.layout
    }

    /// Run the whole provisioning sequence.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<ProvisionReport> {
        self.load_modules().await?;

        let cleanup = self.cleanup().await;
        let port = self.configure_port().await;

        let mut drives = Vec::with_capacity(self.config.drives.len());
        let mut claimed = HashSet::new();
        for (i, uuid) in self.config.drives.iter().enumerate() {
            drives.push(
                self.configure_drive(i + 1, uuid, port.is_available(), &mut claimed)
                    .await,
            );
        }

        let report = ProvisionReport {
            modules: self.config.modules.clone(),
            cleanup,
            port,
            drives,
        };

        if report.is_complete() {
            info!(
                drives = report.drives.len(),
                "NVMe configuration completed"
            );
        } else {
            warn!(
                configured = report.configured_drives(),
                drives = report.drives.len(),
                "NVMe configuration completed with errors"
            );
        }
        Ok(report)
    }

    /// Load the configured kernel modules. Fails on the first module that
    /// does not load.
    pub async fn load_modules(&self) -> Result<()> {
        kmod::load_modules(&self.runner, &self.config.modules)
            .await
            .inspect_err(|e| error!(error = %e, "Aborting: kernel modules unavailable"))
    }
}
