//! Exclusive run lock.
//!
//! A `<db>.lock` file next to the database marks a run in progress. It is
//! created with `create_new`, so a second run against the same database
//! fails immediately instead of racing the first one's full replace.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::IngestError;

/// Held for the duration of a run; removes the lock file on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Acquires the lock guarding `db_path`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::AlreadyRunning`] if another run holds the lock,
    /// or [`IngestError::Io`] if the lock file cannot be created.
    pub fn acquire(db_path: &Path) -> Result<Self, IngestError> {
        let path = police_log_database::paths::lock_path(db_path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            police_log_database::paths::ensure_dir(parent)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(IngestError::AlreadyRunning { lock: path });
            }
            Err(e) => return Err(e.into()),
        };

        writeln!(file, "{}", std::process::id())?;
        log::debug!("Acquired run lock {}", path.display());

        Ok(Self { path })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Failed to remove run lock {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("police_log.duckdb");

        let lock = RunLock::acquire(&db).unwrap();
        assert!(lock.path().exists());

        assert!(matches!(
            RunLock::acquire(&db),
            Err(IngestError::AlreadyRunning { .. })
        ));
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("police_log.duckdb");

        let path = {
            let lock = RunLock::acquire(&db).unwrap();
            lock.path().to_path_buf()
        };

        assert!(!path.exists());
        assert!(RunLock::acquire(&db).is_ok());
    }
}
