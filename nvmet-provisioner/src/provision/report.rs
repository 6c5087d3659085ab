//! Outcome of a provisioning run.
//!
//! Every step records a [`StepStatus`]; nothing is rolled back. The CLI
//! prints the report and derives its exit status from [`ProvisionReport::is_complete`].

use std::fmt::{self, Display};
use std::path::PathBuf;

use serde::Serialize;

use crate::configfs::{DevicePath, DriveUuid, SubsystemName};

/// Result of a single configuration step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Done,
    Skipped { reason: String },
    Failed { error: String },
}

impl StepStatus {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StepStatus::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(error: impl Display) -> Self {
        StepStatus::Failed {
            error: error.to_string(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StepStatus::Done)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepStatus::Failed { .. })
    }
}

/// Lifecycle of a namespace during a run. There is no way back to `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceState {
    Created,
    DevicePathSet,
    Enabled,
    EnableFailed,
}

impl Display for NamespaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamespaceState::Created => write!(f, "created"),
            NamespaceState::DevicePathSet => write!(f, "device path set"),
            NamespaceState::Enabled => write!(f, "enabled"),
            NamespaceState::EnableFailed => write!(f, "enable failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Directories that were removed
    pub removed: Vec<PathBuf>,
    /// Directories that could not be removed
    pub failed: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeWrite {
    pub name: String,
    pub value: String,
    #[serde(flatten)]
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortReport {
    pub path: PathBuf,
    pub create: StepStatus,
    pub attributes: Vec<AttributeWrite>,
}

impl PortReport {
    /// Whether subsystems can be linked to the port.
    pub fn is_available(&self) -> bool {
        self.create.is_done()
    }

    pub fn is_complete(&self) -> bool {
        self.create.is_done() && self.attributes.iter().all(|a| a.status.is_done())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnableOutcome {
    #[serde(flatten)]
    pub status: StepStatus,
    /// Writes attempted (0 if the step was skipped)
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriveReport {
    /// 1-based position in the drive list
    pub index: usize,
    pub uuid: DriveUuid,
    pub label: Option<String>,
    pub subsystem: Option<SubsystemName>,
    pub device_path: DevicePath,
    pub create_subsystem: StepStatus,
    pub allow_any_host: StepStatus,
    pub create_namespace: StepStatus,
    pub set_device_path: StepStatus,
    pub enable: EnableOutcome,
    pub link: StepStatus,
    pub namespace: Option<NamespaceState>,
}

impl DriveReport {
    /// A report with every step skipped for `reason`; steps are filled in as
    /// they run.
    pub(crate) fn pending(index: usize, uuid: &DriveUuid, reason: &str) -> Self {
        Self {
            index,
            uuid: uuid.clone(),
            label: None,
            subsystem: None,
            device_path: uuid.device_path(),
            create_subsystem: StepStatus::skipped(reason),
            allow_any_host: StepStatus::skipped(reason),
            create_namespace: StepStatus::skipped(reason),
            set_device_path: StepStatus::skipped(reason),
            enable: EnableOutcome {
                status: StepStatus::skipped(reason),
                attempts: 0,
            },
            link: StepStatus::skipped(reason),
            namespace: None,
        }
    }

    fn steps(&self) -> [&StepStatus; 6] {
        [
            &self.create_subsystem,
            &self.allow_any_host,
            &self.create_namespace,
            &self.set_device_path,
            &self.enable.status,
            &self.link,
        ]
    }

    pub fn is_complete(&self) -> bool {
        self.namespace == Some(NamespaceState::Enabled)
            && self.steps().iter().all(|s| !s.is_failed())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    /// Kernel modules loaded before configuration
    pub modules: Vec<String>,
    pub cleanup: CleanupReport,
    pub port: PortReport,
    pub drives: Vec<DriveReport>,
}

impl ProvisionReport {
    /// True if every drive is exported and enabled and no step failed.
    pub fn is_complete(&self) -> bool {
        self.cleanup.is_complete()
            && self.port.is_complete()
            && self.drives.iter().all(DriveReport::is_complete)
    }

    /// Drives that ended up fully configured.
    pub fn configured_drives(&self) -> usize {
        self.drives.iter().filter(|d| d.is_complete()).count()
    }
}
