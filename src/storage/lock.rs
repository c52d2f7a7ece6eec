//! Single-writer lock for an archive
//!
//! Crawling processes (the daemon and `--once`) hold an exclusive lock file
//! next to the database while they run, so two of them never crawl or
//! recover runs against the same archive at once.

use crate::storage::{StorageError, StorageResult};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Held for as long as this process may start runs; released on drop
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Lock file path for a database, `<database>.lock`
    pub fn path_for(database_path: &Path) -> PathBuf {
        let mut name = database_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Takes the lock for the archive at `database_path`
    ///
    /// # Returns
    ///
    /// * `Ok(InstanceLock)` - This process now owns the archive
    /// * `Err(StorageError::InstanceLocked)` - Another process holds the lock
    pub fn acquire(database_path: &Path) -> StorageResult<Self> {
        let path = Self::path_for(database_path);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path)
                    .map(|text| text.trim().to_string())
                    .unwrap_or_default();
                return Err(StorageError::InstanceLocked {
                    path: path.display().to_string(),
                    holder: if holder.is_empty() {
                        "unknown process".to_string()
                    } else {
                        holder
                    },
                });
            }
            Err(e) => return Err(e.into()),
        };

        writeln!(file, "pid {}", std::process::id())?;
        tracing::debug!("Acquired archive lock {}", path.display());
        Ok(Self { path })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to release archive lock {}: {}", self.path.display(), e);
        }
    }
}
