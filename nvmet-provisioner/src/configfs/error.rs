use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigfsError {
    #[error("'{0}' not found")]
    NotFound(PathBuf),

    #[error("'{0}' already exists")]
    AlreadyExists(PathBuf),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid drive identifier: {0}")]
    InvalidDrive(String),

    #[error("subsystem name '{0}' is already used by another drive")]
    NameInUse(String),

    #[error("{op} '{path}' failed: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigfsError {
    /// Wrap an I/O error with the operation and path it happened on.
    ///
    /// `NotFound` and `AlreadyExists` are surfaced as their own variants so
    /// callers can match on them without digging into the io::ErrorKind.
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => ConfigfsError::NotFound(path),
            std::io::ErrorKind::AlreadyExists => ConfigfsError::AlreadyExists(path),
            _ => ConfigfsError::Io { op, path, source },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigfsError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ConfigfsError>;
