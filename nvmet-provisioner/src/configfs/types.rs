//! Type-safe wrappers for nvmet identifiers.
//!
//! This module provides newtypes for drive identifiers, subsystem names and
//! device paths, plus the enums written into port attributes. Everything that
//! ends up as a configfs path component or attribute value goes through one
//! of these types.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{ConfigfsError, Result};

/// Maximum length of an NVMe qualified name.
const MAX_NAME_LEN: usize = 223;

/// Validate that a name is safe for use as a configfs directory name.
/// Allows: ASCII alphanumeric, underscore, hyphen, period, colon.
fn validate_name(name: &str, kind: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ConfigfsError::InvalidName(format!("{} cannot be empty", kind)));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(ConfigfsError::InvalidName(format!(
            "{} '{}' exceeds maximum length of {} characters",
            kind, name, MAX_NAME_LEN
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' || c == ':')
    {
        return Err(ConfigfsError::InvalidName(format!(
            "invalid characters in {} '{}': only alphanumeric, underscore, hyphen, period, and colon allowed",
            kind, name
        )));
    }

    if name.contains("..") {
        return Err(ConfigfsError::InvalidName(format!(
            "{} '{}' contains path traversal sequence",
            kind, name
        )));
    }

    Ok(())
}

/// Validate a subsystem name prefix. Same alphabet as a full name, but may be
/// empty (subsystems are then named by label or index alone).
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Ok(());
    }
    validate_name(prefix, "subsystem prefix")
}

// ============================================================================
// DriveUuid
// ============================================================================

/// Filesystem identifier of a drive, as listed under `/dev/disk/by-uuid/`.
///
/// Either an RFC 4122 UUID (ext4, xfs, btrfs) or a short volume serial such
/// as `1A2B-3C4D` (vfat, ntfs). Kept as given: by-uuid link names are case
/// sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DriveUuid(String);

impl DriveUuid {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        // Only the hyphenated form appears under by-uuid.
        let is_uuid = s.len() == 36 && Uuid::parse_str(s).is_ok();
        if is_uuid || is_volume_serial(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(ConfigfsError::InvalidDrive(format!(
                "'{}' is neither a UUID nor a volume serial",
                s
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Device path for this drive under `/dev/disk/by-uuid/`.
    pub fn device_path(&self) -> DevicePath {
        DevicePath(format!("{}{}", DevicePath::BY_UUID, self.0))
    }
}

/// `XXXX-XXXX` (vfat) or 16 hex digits (ntfs).
fn is_volume_serial(s: &str) -> bool {
    let is_hex = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_hexdigit());
    match s.split_once('-') {
        Some((a, b)) => a.len() == 4 && b.len() == 4 && is_hex(a) && is_hex(b),
        None => s.len() == 16 && is_hex(s),
    }
}

impl Display for DriveUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DriveUuid {
    type Err = ConfigfsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DriveUuid {
    type Error = ConfigfsError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<DriveUuid> for String {
    fn from(uuid: DriveUuid) -> Self {
        uuid.0
    }
}

// ============================================================================
// DevicePath
// ============================================================================

/// Backing device path written to a namespace's `device_path` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DevicePath(String);

impl DevicePath {
    const BY_UUID: &'static str = "/dev/disk/by-uuid/";

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DevicePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// SubsystemName
// ============================================================================

/// Name of an nvmet subsystem directory (and of its link under the port).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubsystemName(String);

impl SubsystemName {
    /// Label-derived name: `<prefix><label>`.
    pub fn from_label(prefix: &str, label: &str) -> Result<Self> {
        validate_prefix(prefix)?;
        validate_name(label, "drive label")?;
        Self::parse(&format!("{}{}", prefix, label))
    }

    /// Positional name: `<prefix><index:02>`, index is 1-based.
    pub fn positional(prefix: &str, index: usize) -> Result<Self> {
        validate_prefix(prefix)?;
        Self::parse(&format!("{}{:02}", prefix, index))
    }

    pub fn parse(s: &str) -> Result<Self> {
        validate_name(s, "subsystem name")?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SubsystemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubsystemName {
    type Err = ConfigfsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for SubsystemName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Transport / AddressFamily
// ============================================================================

/// Value of a port's `addr_trtype` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Rdma,
    Loop,
}

impl Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Rdma => write!(f, "rdma"),
            Transport::Loop => write!(f, "loop"),
        }
    }
}

impl FromStr for Transport {
    type Err = ConfigfsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "rdma" => Ok(Transport::Rdma),
            "loop" => Ok(Transport::Loop),
            _ => Err(ConfigfsError::InvalidName(format!(
                "unknown transport '{}': expected tcp, rdma or loop",
                s
            ))),
        }
    }
}

/// Value of a port's `addr_adrfam` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[default]
    Ipv4,
    Ipv6,
}

impl Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

impl FromStr for AddressFamily {
    type Err = ConfigfsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ipv4" => Ok(AddressFamily::Ipv4),
            "ipv6" => Ok(AddressFamily::Ipv6),
            _ => Err(ConfigfsError::InvalidName(format!(
                "unknown address family '{}': expected ipv4 or ipv6",
                s
            ))),
        }
    }
}
