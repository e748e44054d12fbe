//! File-based locking so only one enforcing instance drives the firewall.
//!
//! Uses flock-style advisory locking. Dry runs never take the lock.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "/run/fail2drop.lock";

/// Holds an exclusive lock until dropped.
pub struct LockGuard {
    _file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Acquire the system-wide lock at [`LOCK_FILE`].
    pub fn acquire() -> Result<Self> {
        Self::acquire_at(Path::new(LOCK_FILE))
    }

    /// Acquire an exclusive lock on `lock_path` without blocking.
    pub fn acquire_at(lock_path: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).ok();
        }

        // create+read+write without truncate: no race between create and lock
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("Failed to open lock file: {:?}", lock_path))?;

        fs::set_permissions(lock_path, fs::Permissions::from_mode(0o600))
            .context("Failed to set lock file permissions")?;

        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another fail2drop instance is already enforcing.\n\
                 Stop it first, or remove the stale lock file: {:?}",
                lock_path
            )
        })?;

        Ok(Self {
            _file: file,
            path: lock_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fail2drop.lock");

        let guard = LockGuard::acquire_at(&path).unwrap();
        assert_eq!(guard.path(), path.as_path());

        let err = LockGuard::acquire_at(&path).err().unwrap();
        assert!(err.to_string().contains("already enforcing"));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fail2drop.lock");

        drop(LockGuard::acquire_at(&path).unwrap());
        assert!(LockGuard::acquire_at(&path).is_ok());
    }

    #[test]
    fn test_lock_file_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fail2drop.lock");

        let _guard = LockGuard::acquire_at(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
