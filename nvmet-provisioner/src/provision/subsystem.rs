use std::collections::HashSet;

use tracing::{error, info, instrument, warn};

use crate::command::CommandRunner;
use crate::configfs::layout::{ATTR_ALLOW_ANY_HOST, ATTR_DEVICE_PATH, ATTR_ENABLE, NAMESPACE_ID, PORT_ID};
use crate::configfs::{ConfigfsError, DriveUuid, SubsystemName, attr};
use crate::label::lookup_label;

use super::Provisioner;
use super::report::{DriveReport, EnableOutcome, NamespaceState, StepStatus};

impl<R: CommandRunner> Provisioner<R> {
    /// Name a drive's subsystem: `<prefix><label>` if the drive has a usable
    /// label, `<prefix><index:02>` otherwise.
    ///
    /// Names already in `claimed` belong to earlier drives of the same run. A
    /// taken label name falls back to the positional name; a taken
    /// positional name is an error.
    pub async fn subsystem_name(
        &self,
        index: usize,
        uuid: &DriveUuid,
        claimed: &HashSet<SubsystemName>,
    ) -> (Option<String>, Result<SubsystemName, ConfigfsError>) {
        let prefix = &self.config.subsystem_prefix;
        let label = lookup_label(&self.runner, uuid).await;

        let labelled = label.as_deref().and_then(|label| {
            match SubsystemName::from_label(prefix, label) {
                Ok(name) if claimed.contains(&name) => {
                    warn!(drive = %uuid, subsystem = %name, "Label name already used by another drive, using position");
                    None
                }
                Ok(name) => Some(name),
                Err(e) => {
                    warn!(drive = %uuid, label, error = %e, "Label unusable as subsystem name, using position");
                    None
                }
            }
        });

        let name = match labelled {
            Some(name) => Ok(name),
            None => SubsystemName::positional(prefix, index).and_then(|name| {
                if claimed.contains(&name) {
                    Err(ConfigfsError::NameInUse(name.to_string()))
                } else {
                    Ok(name)
                }
            }),
        };
        (label, name)
    }

    /// Export one drive: subsystem, namespace, device path, enable, port link.
    ///
    /// A step that cannot run because an earlier one failed is reported as
    /// skipped. Nothing is rolled back.
    ///
    /// The chosen name is added to `claimed` so no later drive reuses it.
    #[instrument(skip(self, uuid, port_available, claimed), fields(drive = %uuid))]
    pub async fn configure_drive(
        &self,
        index: usize,
        uuid: &DriveUuid,
        port_available: bool,
        claimed: &mut HashSet<SubsystemName>,
    ) -> DriveReport {
        let mut report = DriveReport::pending(index, uuid, "subsystem not created");

        let (label, name) = self.subsystem_name(index, uuid, claimed).await;
        report.label = label;
        let name = match name {
            Ok(name) => {
                claimed.insert(name.clone());
                name
            }
            Err(e) => {
                error!(error = %e, "Cannot derive a subsystem name");
                report.create_subsystem = StepStatus::failed(e);
                return report;
            }
        };
        report.subsystem = Some(name.clone());

        // Subsystem
        let subsystem_dir = self.layout.subsystem_dir(&name);
        info!(subsystem = %name, "Creating NVMe subsystem directory...");
        if let Err(e) = attr::ensure_dir(&subsystem_dir).await {
            error!(path = %subsystem_dir.display(), error = %e, "Failed to create subsystem");
            report.create_subsystem = StepStatus::failed(e);
            return report;
        }
        info!(path = %subsystem_dir.display(), "Created directory");
        report.create_subsystem = StepStatus::Done;

        report.allow_any_host =
            write_step(&subsystem_dir.join(ATTR_ALLOW_ANY_HOST), "1").await;

        // Namespace
        let namespace_dir = self.layout.namespace_dir(&name);
        info!(subsystem = %name, namespace = NAMESPACE_ID, "Creating and configuring namespace...");
        if let Err(e) = attr::ensure_dir(&namespace_dir).await {
            error!(path = %namespace_dir.display(), error = %e, "Failed to create namespace");
            report.create_namespace = StepStatus::failed(e);
            let reason = "namespace not created";
            report.set_device_path = StepStatus::skipped(reason);
            report.enable.status = StepStatus::skipped(reason);
            report.link = self.link(&name, port_available).await;
            return report;
        }
        info!(path = %namespace_dir.display(), "Created directory");
        report.create_namespace = StepStatus::Done;
        report.namespace = Some(NamespaceState::Created);

        report.set_device_path = write_step(
            &namespace_dir.join(ATTR_DEVICE_PATH),
            report.device_path.as_str(),
        )
        .await;

        if report.set_device_path.is_done() {
            report.namespace = Some(NamespaceState::DevicePathSet);
            report.enable = self.enable_namespace(&name).await;
            report.namespace = Some(if report.enable.status.is_done() {
                NamespaceState::Enabled
            } else {
                NamespaceState::EnableFailed
            });
        } else {
            report.enable.status = StepStatus::skipped("device path not set");
        }

        report.link = self.link(&name, port_available).await;
        report
    }

    /// Write `1` to the namespace's `enable` attribute, waiting for the
    /// kernel to create it.
    async fn enable_namespace(&self, name: &SubsystemName) -> EnableOutcome {
        let enable_path = self.layout.namespace_dir(name).join(ATTR_ENABLE);
        let policy = self.config.enable_retry_policy();

        let result = policy
            .run(
                "enable namespace",
                ConfigfsError::is_not_found,
                || attr::write_existing_attr(&enable_path, "1"),
            )
            .await;

        match result {
            Ok(((), attempts)) => {
                info!(path = %enable_path.display(), attempts, "Enabled namespace");
                EnableOutcome {
                    status: StepStatus::Done,
                    attempts,
                }
            }
            Err(e) => {
                if e.exhausted {
                    error!(
                        path = %enable_path.display(),
                        attempts = e.attempts,
                        "Failed to enable namespace after multiple attempts"
                    );
                } else {
                    error!(path = %enable_path.display(), error = %e.error, "Failed to enable namespace");
                }
                EnableOutcome {
                    status: StepStatus::failed(e.error),
                    attempts: e.attempts,
                }
            }
        }
    }

    /// Link the subsystem under the port. An existing entry is left alone.
    async fn link(&self, name: &SubsystemName, port_available: bool) -> StepStatus {
        if !port_available {
            return StepStatus::skipped("port not configured");
        }

        info!(subsystem = %name, port = PORT_ID, "Linking subsystem to port...");
        let link_path = self.layout.port_link(name);
        let subsystem_dir = self.layout.subsystem_dir(name);

        if attr::entry_exists(&link_path).await {
            warn!(path = %link_path.display(), "Symlink already exists");
            return StepStatus::skipped("link already exists");
        }

        // Present on configfs; missing on a plain directory tree.
        if let Err(e) = attr::ensure_dir(&self.layout.port_links_dir()).await {
            error!(error = %e, "Port has no subsystems directory");
            return StepStatus::failed(e);
        }

        match attr::symlink(&subsystem_dir, &link_path).await {
            Ok(()) => {
                info!(
                    subsystem_path = %subsystem_dir.display(),
                    link = %link_path.display(),
                    "Linked subsystem"
                );
                StepStatus::Done
            }
            Err(e) => {
                error!(link = %link_path.display(), error = %e, "Failed to link subsystem");
                StepStatus::failed(e)
            }
        }
    }
}

async fn write_step(path: &std::path::Path, value: &str) -> StepStatus {
    match attr::write_attr(path, value).await {
        Ok(()) => {
            info!(path = %path.display(), "Wrote to file");
            StepStatus::Done
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to write");
            StepStatus::failed(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::command::CommandOutput;
    use crate::command::fake::ScriptedRunner;
    use crate::config::ProvisionConfig;
    use crate::configfs::{DriveUuid, attr};
    use crate::provision::{NamespaceState, Provisioner, StepStatus};

    const UUID_A: &str = "a52c88ab-41e1-4c3a-9e0c-a276b4146b1e";
    const UUID_B: &str = "cafd9e45-177a-4b28-8fc9-a1872871182b";

    fn lsblk(uuid: &str) -> String {
        format!("lsblk -no LABEL /dev/disk/by-uuid/{}", uuid)
    }

    fn provisioner(root: &TempDir, runner: ScriptedRunner) -> Provisioner<ScriptedRunner> {
        let config = ProvisionConfig::default()
            .with_drives(vec![
                DriveUuid::parse(UUID_A).unwrap(),
                DriveUuid::parse(UUID_B).unwrap(),
            ])
            .with_prefix("mckenna-")
            .with_configfs_root(root.path())
            .with_enable_retry(3, Duration::from_millis(1));
        Provisioner::new(config, runner).unwrap()
    }

    #[tokio::test]
    async fn test_subsystem_name_uses_label_or_position() {
        let root = TempDir::new().unwrap();
        let runner = ScriptedRunner::default()
            .with(&lsblk(UUID_A), CommandOutput::ok("datadisk\n"))
            .with(&lsblk(UUID_B), CommandOutput::ok(""));
        let p = provisioner(&root, runner);

        let (label, name) = p
            .subsystem_name(1, &DriveUuid::parse(UUID_A).unwrap(), &HashSet::new())
            .await;
        assert_eq!(label.as_deref(), Some("datadisk"));
        assert_eq!(name.unwrap().as_str(), "mckenna-datadisk");

        let (label, name) = p
            .subsystem_name(2, &DriveUuid::parse(UUID_B).unwrap(), &HashSet::new())
            .await;
        assert!(label.is_none());
        assert_eq!(name.unwrap().as_str(), "mckenna-02");
    }

    #[tokio::test]
    async fn test_unusable_label_falls_back_to_position() {
        let root = TempDir::new().unwrap();
        let runner =
            ScriptedRunner::default().with(&lsblk(UUID_A), CommandOutput::ok("My Disk/1\n"));
        let p = provisioner(&root, runner);

        let (label, name) = p
            .subsystem_name(1, &DriveUuid::parse(UUID_A).unwrap(), &HashSet::new())
            .await;
        assert_eq!(label.as_deref(), Some("My Disk/1"));
        assert_eq!(name.unwrap().as_str(), "mckenna-01");
    }

    #[tokio::test]
    async fn test_configure_drive_without_enable_attribute() {
        let root = TempDir::new().unwrap();
        let p = provisioner(&root, ScriptedRunner::default());
        attr::ensure_dir(&root.path().join("ports/1")).await.unwrap();

        let report = p
            .configure_drive(1, &DriveUuid::parse(UUID_A).unwrap(), true, &mut HashSet::new())
            .await;

        assert_eq!(report.subsystem.as_ref().unwrap().as_str(), "mckenna-01");
        assert!(report.create_subsystem.is_done());
        assert!(report.allow_any_host.is_done());
        assert!(report.set_device_path.is_done());
        assert!(report.enable.status.is_failed());
        assert_eq!(report.enable.attempts, 3);
        assert_eq!(report.namespace, Some(NamespaceState::EnableFailed));
        assert!(report.link.is_done());
        assert!(!report.is_complete());

        let ns = root.path().join("subsystems/mckenna-01/namespaces/1");
        assert_eq!(
            attr::read_attr(&ns.join("device_path")).await.unwrap(),
            format!("/dev/disk/by-uuid/{}", UUID_A)
        );
        assert!(!ns.join("enable").exists());
    }

    #[tokio::test]
    async fn test_configure_drive_enables_existing_attribute() {
        let root = TempDir::new().unwrap();
        let p = provisioner(&root, ScriptedRunner::default());
        let ns = root.path().join("subsystems/mckenna-01/namespaces/1");
        attr::ensure_dir(&ns).await.unwrap();
        attr::write_attr(&ns.join("enable"), "0").await.unwrap();

        let report = p
            .configure_drive(1, &DriveUuid::parse(UUID_A).unwrap(), false, &mut HashSet::new())
            .await;

        assert_eq!(report.enable.attempts, 1);
        assert_eq!(report.namespace, Some(NamespaceState::Enabled));
        assert_eq!(report.link, StepStatus::skipped("port not configured"));
        assert_eq!(attr::read_attr(&ns.join("enable")).await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_relink_leaves_existing_link() {
        let root = TempDir::new().unwrap();
        let p = provisioner(&root, ScriptedRunner::default());
        let links = root.path().join("ports/1/subsystems");
        attr::ensure_dir(&links).await.unwrap();
        let elsewhere = root.path().join("elsewhere");
        attr::symlink(&elsewhere, &links.join("mckenna-01")).await.unwrap();

        let report = p
            .configure_drive(1, &DriveUuid::parse(UUID_A).unwrap(), true, &mut HashSet::new())
            .await;

        assert_eq!(report.link, StepStatus::skipped("link already exists"));
        assert_eq!(
            tokio::fs::read_link(links.join("mckenna-01")).await.unwrap(),
            elsewhere
        );
    }

    #[tokio::test]
    async fn test_subsystem_creation_failure_skips_remaining_steps() {
        let root = TempDir::new().unwrap();
        tokio::fs::write(root.path().join("subsystems"), "").await.unwrap();
        let p = provisioner(&root, ScriptedRunner::default());

        let report = p
            .configure_drive(1, &DriveUuid::parse(UUID_A).unwrap(), true, &mut HashSet::new())
            .await;

        assert!(report.create_subsystem.is_failed());
        assert_eq!(report.link, StepStatus::skipped("subsystem not created"));
        assert_eq!(report.enable.attempts, 0);
        assert!(report.namespace.is_none());
    }

    #[tokio::test]
    async fn test_shared_label_gives_second_drive_its_position() {
        let root = TempDir::new().unwrap();
        let runner = ScriptedRunner::default()
            .with(&lsblk(UUID_A), CommandOutput::ok("data\n"))
            .with(&lsblk(UUID_B), CommandOutput::ok("data\n"));
        let p = provisioner(&root, runner);
        let mut claimed = HashSet::new();

        let a = p
            .configure_drive(1, &DriveUuid::parse(UUID_A).unwrap(), false, &mut claimed)
            .await;
        let b = p
            .configure_drive(2, &DriveUuid::parse(UUID_B).unwrap(), false, &mut claimed)
            .await;

        assert_eq!(a.subsystem.as_ref().unwrap().as_str(), "mckenna-data");
        assert_eq!(b.subsystem.as_ref().unwrap().as_str(), "mckenna-02");
        assert_eq!(b.label.as_deref(), Some("data"));

        let subsystems = root.path().join("subsystems");
        assert_eq!(
            attr::read_attr(&subsystems.join("mckenna-data/namespaces/1/device_path"))
                .await
                .unwrap(),
            format!("/dev/disk/by-uuid/{}", UUID_A)
        );
        assert_eq!(
            attr::read_attr(&subsystems.join("mckenna-02/namespaces/1/device_path"))
                .await
                .unwrap(),
            format!("/dev/disk/by-uuid/{}", UUID_B)
        );
    }

    #[tokio::test]
    async fn test_label_taking_a_positional_name_fails_the_later_drive() {
        let root = TempDir::new().unwrap();
        let runner = ScriptedRunner::default().with(&lsblk(UUID_A), CommandOutput::ok("02\n"));
        let p = provisioner(&root, runner);
        let mut claimed = HashSet::new();

        let a = p
            .configure_drive(1, &DriveUuid::parse(UUID_A).unwrap(), false, &mut claimed)
            .await;
        let b = p
            .configure_drive(2, &DriveUuid::parse(UUID_B).unwrap(), false, &mut claimed)
            .await;

        assert_eq!(a.subsystem.as_ref().unwrap().as_str(), "mckenna-02");
        assert!(b.subsystem.is_none());
        assert!(b.create_subsystem.is_failed());
        assert!(b.namespace.is_none());
        assert!(!b.is_complete());

        // The first drive's export is untouched
        assert_eq!(
            attr::read_attr(&root.path().join("subsystems/mckenna-02/namespaces/1/device_path"))
                .await
                .unwrap(),
            format!("/dev/disk/by-uuid/{}", UUID_A)
        );
    }
}
