//! Primitive operations on configfs entries.
//!
//! configfs behaves like a regular filesystem for directories and symlinks,
//! but attribute files are owned by the kernel: they appear when their
//! directory is created and cannot be unlinked. The helpers below are
//! written so the same code works on the real tree and on a plain directory
//! used as a stand-in in tests.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::error::{ConfigfsError, Result};

/// Create a directory (and missing parents). Succeeds if it already exists.
pub async fn ensure_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| ConfigfsError::io("mkdir", path, e))
}

/// Write an attribute value, creating the file if it does not exist.
pub async fn write_attr(path: &Path, value: &str) -> Result<()> {
    tokio::fs::write(path, value)
        .await
        .map_err(|e| ConfigfsError::io("write", path, e))
}

/// Write an attribute value into a file that must already exist.
///
/// Returns `ConfigfsError::NotFound` if the kernel has not materialised the
/// attribute yet.
pub async fn write_existing_attr(path: &Path, value: &str) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|e| ConfigfsError::io("open", path, e))?;
    file.write_all(value.as_bytes())
        .await
        .map_err(|e| ConfigfsError::io("write", path, e))?;
    file.flush()
        .await
        .map_err(|e| ConfigfsError::io("flush", path, e))
}

/// Read an attribute value with surrounding whitespace removed.
pub async fn read_attr(path: &Path) -> Result<String> {
    let value = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigfsError::io("read", path, e))?;
    Ok(value.trim().to_string())
}

/// Whether anything (including a dangling symlink) exists at `path`.
pub async fn entry_exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}

/// Whether `path` exists and is a directory.
pub async fn dir_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Create a symlink at `link` pointing to `target`.
pub async fn symlink(target: &Path, link: &Path) -> Result<()> {
    tokio::fs::symlink(target, link)
        .await
        .map_err(|e| ConfigfsError::io("symlink", link, e))
}

/// List the names of the entries in a directory, sorted.
pub async fn list_dir(path: &Path) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(path)
        .await
        .map_err(|e| ConfigfsError::io("readdir", path, e))?;
    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ConfigfsError::io("readdir", path, e))?
    {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Remove a directory tree.
///
/// Everything below `dir` is removed best-effort (symlinks and files are
/// unlinked, subdirectories removed deepest first); only the final `rmdir`
/// of `dir` itself decides the result. On configfs the kernel drops
/// attribute files and default groups together with their parent.
pub async fn remove_tree(dir: &Path) -> Result<()> {
    clear_dir(dir).await;
    tokio::fs::remove_dir(dir)
        .await
        .map_err(|e| ConfigfsError::io("rmdir", dir, e))
}

async fn clear_dir(dir: &Path) {
    let mut pending = vec![dir.to_path_buf()];
    // Parents are always discovered before their children.
    let mut subdirs: Vec<PathBuf> = Vec::new();

    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %current.display(), error = %e, "Cannot list directory");
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    debug!(path = %current.display(), error = %e, "Cannot read directory entry");
                    break;
                }
            };
            let path = entry.path();
            // DirEntry::file_type does not follow symlinks.
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => {
                    pending.push(path.clone());
                    subdirs.push(path);
                }
                Ok(_) => {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        debug!(path = %path.display(), error = %e, "Entry not removed");
                    }
                }
                Err(e) => debug!(path = %path.display(), error = %e, "Cannot stat entry"),
            }
        }
    }

    for sub in subdirs.iter().rev() {
        if let Err(e) = tokio::fs::remove_dir(sub).await {
            debug!(path = %sub.display(), error = %e, "Directory not removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_read_attr() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("addr_trsvcid");

        write_attr(&path, "4420").await.unwrap();
        assert_eq!(read_attr(&path).await.unwrap(), "4420");

        write_attr(&path, "4421").await.unwrap();
        assert_eq!(read_attr(&path).await.unwrap(), "4421");
    }

    #[tokio::test]
    async fn test_write_existing_attr_requires_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("enable");

        let err = write_existing_attr(&path, "1").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!entry_exists(&path).await);

        tokio::fs::write(&path, "0").await.unwrap();
        write_existing_attr(&path, "1").await.unwrap();
        assert_eq!(read_attr(&path).await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_ensure_dir_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ports").join("1");

        ensure_dir(&path).await.unwrap();
        ensure_dir(&path).await.unwrap();
        assert!(dir_exists(&path).await);
    }

    #[tokio::test]
    async fn test_entry_exists_sees_dangling_symlink() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("link");

        symlink(&dir.path().join("missing"), &link).await.unwrap();
        assert!(entry_exists(&link).await);
        assert!(!dir_exists(&link).await);
    }

    #[tokio::test]
    async fn test_remove_tree_does_not_follow_links() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("subsystems").join("nvmet-01");
        let port = dir.path().join("ports").join("1");
        ensure_dir(&target).await.unwrap();
        ensure_dir(&port.join("subsystems")).await.unwrap();
        write_attr(&target.join("attr_allow_any_host"), "1").await.unwrap();
        write_attr(&port.join("addr_trtype"), "tcp").await.unwrap();
        symlink(&target, &port.join("subsystems").join("nvmet-01"))
            .await
            .unwrap();

        remove_tree(&port).await.unwrap();

        assert!(!entry_exists(&port).await);
        assert!(dir_exists(&target).await);
        assert_eq!(
            read_attr(&target.join("attr_allow_any_host")).await.unwrap(),
            "1"
        );
    }

    #[tokio::test]
    async fn test_remove_tree_missing_dir() {
        let dir = TempDir::new().unwrap();
        let err = remove_tree(&dir.path().join("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_dir_sorted() {
        let dir = TempDir::new().unwrap();
        ensure_dir(&dir.path().join("b")).await.unwrap();
        ensure_dir(&dir.path().join("a")).await.unwrap();
        assert_eq!(list_dir(dir.path()).await.unwrap(), vec!["a", "b"]);
    }
}
