//! Path layout of the nvmet configfs tree.
//!
//! ```text
//! <root>/ports/1/{addr_traddr,addr_trtype,addr_trsvcid,addr_adrfam}
//! <root>/ports/1/subsystems/<name> -> <root>/subsystems/<name>
//! <root>/subsystems/<name>/attr_allow_any_host
//! <root>/subsystems/<name>/namespaces/1/{device_path,enable}
//! ```

use std::path::{Path, PathBuf};

use super::types::SubsystemName;

/// Default mount point of the nvmet configfs tree.
pub const DEFAULT_ROOT: &str = "/sys/kernel/config/nvmet";

/// Index of the single port this tool manages.
pub const PORT_ID: u32 = 1;

/// Index of the single namespace created in each subsystem.
pub const NAMESPACE_ID: u32 = 1;

pub const ATTR_TRADDR: &str = "addr_traddr";
pub const ATTR_TRTYPE: &str = "addr_trtype";
pub const ATTR_TRSVCID: &str = "addr_trsvcid";
pub const ATTR_ADRFAM: &str = "addr_adrfam";
pub const ATTR_ALLOW_ANY_HOST: &str = "attr_allow_any_host";
pub const ATTR_DEVICE_PATH: &str = "device_path";
pub const ATTR_ENABLE: &str = "enable";

/// Resolves every path the provisioner touches relative to a configfs root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigfsLayout {
    root: PathBuf,
}

impl ConfigfsLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn port_dir(&self) -> PathBuf {
        self.root.join("ports").join(PORT_ID.to_string())
    }

    pub fn port_attr(&self, attr: &str) -> PathBuf {
        self.port_dir().join(attr)
    }

    /// Directory holding the port's subsystem links.
    pub fn port_links_dir(&self) -> PathBuf {
        self.port_dir().join("subsystems")
    }

    pub fn port_link(&self, name: &SubsystemName) -> PathBuf {
        self.port_links_dir().join(name.as_str())
    }

    pub fn subsystems_dir(&self) -> PathBuf {
        self.root.join("subsystems")
    }

    pub fn subsystem_dir(&self, name: &SubsystemName) -> PathBuf {
        self.subsystems_dir().join(name.as_str())
    }

    pub fn namespaces_dir(&self, name: &SubsystemName) -> PathBuf {
        self.subsystem_dir(name).join("namespaces")
    }

    pub fn namespace_dir(&self, name: &SubsystemName) -> PathBuf {
        self.namespaces_dir(name).join(NAMESPACE_ID.to_string())
    }
}

impl Default for ConfigfsLayout {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}
