//! Read the nvmet configfs tree back into a serialisable snapshot.
//!
//! The provisioner's only externally observable result is the tree itself;
//! `status` prints this snapshot so a run can be checked afterwards.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::configfs::layout::{ATTR_ALLOW_ANY_HOST, ATTR_DEVICE_PATH, ATTR_ENABLE};
use crate::configfs::{ConfigfsLayout, Result, attr};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceSnapshot {
    pub device_path: Option<String>,
    pub enable: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubsystemSnapshot {
    pub allow_any_host: Option<String>,
    pub namespaces: BTreeMap<String, NamespaceSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortSnapshot {
    /// `addr_*` attributes
    pub attributes: BTreeMap<String, String>,
    /// Link name -> name of the subsystem it points to
    pub subsystems: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeSnapshot {
    pub port: Option<PortSnapshot>,
    pub subsystems: BTreeMap<String, SubsystemSnapshot>,
}

impl TreeSnapshot {
    /// Subsystems linked under the port.
    pub fn linked(&self) -> Vec<&str> {
        self.port
            .as_ref()
            .map(|p| p.subsystems.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Take a snapshot of the port and all subsystems.
pub async fn snapshot(layout: &ConfigfsLayout) -> Result<TreeSnapshot> {
    let port_dir = layout.port_dir();
    let port = if attr::dir_exists(&port_dir).await {
        Some(port_snapshot(layout).await?)
    } else {
        None
    };

    let mut subsystems = BTreeMap::new();
    let subsystems_dir = layout.subsystems_dir();
    if attr::dir_exists(&subsystems_dir).await {
        for name in attr::list_dir(&subsystems_dir).await? {
            let dir = subsystems_dir.join(&name);
            if attr::dir_exists(&dir).await {
                subsystems.insert(name, subsystem_snapshot(&dir).await?);
            }
        }
    }

    Ok(TreeSnapshot { port, subsystems })
}

async fn port_snapshot(layout: &ConfigfsLayout) -> Result<PortSnapshot> {
    let port_dir = layout.port_dir();
    let mut snapshot = PortSnapshot::default();

    for name in attr::list_dir(&port_dir).await? {
        if name.starts_with("addr_") {
            let value = attr::read_attr(&port_dir.join(&name)).await?;
            snapshot.attributes.insert(name, value);
        }
    }

    let links_dir = layout.port_links_dir();
    if attr::dir_exists(&links_dir).await {
        for name in attr::list_dir(&links_dir).await? {
            let target = tokio::fs::read_link(links_dir.join(&name))
                .await
                .ok()
                .and_then(|t| t.file_name().map(|f| f.to_string_lossy().into_owned()))
                .unwrap_or_default();
            snapshot.subsystems.insert(name, target);
        }
    }

    Ok(snapshot)
}

async fn subsystem_snapshot(dir: &Path) -> Result<SubsystemSnapshot> {
    let mut snapshot = SubsystemSnapshot {
        allow_any_host: read_optional(&dir.join(ATTR_ALLOW_ANY_HOST)).await,
        namespaces: BTreeMap::new(),
    };

    let namespaces_dir = dir.join("namespaces");
    if attr::dir_exists(&namespaces_dir).await {
        for ns in attr::list_dir(&namespaces_dir).await? {
            let ns_dir = namespaces_dir.join(&ns);
            snapshot.namespaces.insert(
                ns,
                NamespaceSnapshot {
                    device_path: read_optional(&ns_dir.join(ATTR_DEVICE_PATH)).await,
                    enable: read_optional(&ns_dir.join(ATTR_ENABLE)).await,
                },
            );
        }
    }

    Ok(snapshot)
}

async fn read_optional(path: &Path) -> Option<String> {
    attr::read_attr(path).await.ok()
}
