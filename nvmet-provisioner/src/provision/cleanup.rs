use std::path::Path;

use tracing::{error, info, instrument, warn};

use crate::command::CommandRunner;
use crate::config::CleanupScope;
use crate::configfs::{ConfigfsError, SubsystemName, attr};

use super::Provisioner;
use super::report::{CleanupFailure, CleanupReport};

impl<R: CommandRunner> Provisioner<R> {
    /// Remove the port and the subsystems a previous run may have left.
    ///
    /// The port goes first so no subsystem is still linked when it is
    /// removed. Failures are recorded and never abort the run.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> CleanupReport {
        info!("Cleaning up existing NVMe configuration...");
        let mut report = CleanupReport::default();

        let port_dir = self.layout.port_dir();
        if attr::dir_exists(&port_dir).await {
            info!(path = %port_dir.display(), "Removing port configuration");
            record(&mut report, &port_dir, attr::remove_tree(&port_dir).await);
        }

        for name in self.cleanup_targets().await {
            let subsystem_dir = self.layout.subsystem_dir(&name);
            if !attr::dir_exists(&subsystem_dir).await {
                continue;
            }

            info!(path = %subsystem_dir.display(), "Removing subsystem configuration");
            let result = match self.remove_namespaces(&name).await {
                Ok(()) => attr::remove_tree(&subsystem_dir).await,
                Err(e) => Err(e),
            };
            record(&mut report, &subsystem_dir, result);
        }

        report
    }

    /// Subsystem names to remove: the positional name of every configured
    /// drive, plus any existing subsystem carrying the prefix when the scope
    /// is `prefix`.
    async fn cleanup_targets(&self) -> Vec<SubsystemName> {
        let prefix = &self.config.subsystem_prefix;
        let mut targets: Vec<SubsystemName> = (1..=self.config.drives.len())
            .filter_map(|i| SubsystemName::positional(prefix, i).ok())
            .collect();

        if self.config.cleanup_scope != CleanupScope::Prefix {
            return targets;
        }
        if prefix.is_empty() {
            warn!("Empty subsystem prefix, only positional subsystems are cleaned up");
            return targets;
        }

        let subsystems_dir = self.layout.subsystems_dir();
        let existing = match attr::list_dir(&subsystems_dir).await {
            Ok(names) => names,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Cannot list subsystems, only positional subsystems are cleaned up");
                Vec::new()
            }
        };

        for name in existing.iter().filter(|n| n.starts_with(prefix.as_str())) {
            match SubsystemName::parse(name) {
                Ok(name) if !targets.contains(&name) => targets.push(name),
                Ok(_) => {}
                Err(e) => warn!(name = %name, error = %e, "Skipping subsystem with unexpected name"),
            }
        }
        targets
    }

    /// Remove every namespace of a subsystem.
    async fn remove_namespaces(&self, name: &SubsystemName) -> Result<(), ConfigfsError> {
        let namespaces_dir = self.layout.namespaces_dir(name);
        if !attr::dir_exists(&namespaces_dir).await {
            return Ok(());
        }

        for ns in attr::list_dir(&namespaces_dir).await? {
            let ns_dir = namespaces_dir.join(&ns);
            attr::remove_tree(&ns_dir).await?;
            info!(path = %ns_dir.display(), "Removed namespace");
        }
        Ok(())
    }
}

fn record(report: &mut CleanupReport, path: &Path, result: Result<(), ConfigfsError>) {
    match result {
        Ok(()) => {
            info!(path = %path.display(), "Removed");
            report.removed.push(path.to_path_buf());
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to remove configuration");
            report.failed.push(CleanupFailure {
                path: path.to_path_buf(),
                error: e.to_string(),
            });
        }
    }
}
