//! Data directory lock
//!
//! One `Database` per data directory. The lock is an OS advisory lock on
//! `<data_dir>/.lock`, so it disappears with the process even after a crash.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{Result, SealError};

/// Exclusive lock on a data directory, released on drop
#[derive(Debug)]
pub struct DataDirLock {
    file: File,
    path: PathBuf,
}

impl DataDirLock {
    /// Take the lock without blocking; fails with `AlreadyOpen` if it is held
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Acquired data directory lock");
                Ok(Self { file, path })
            }
            Err(e) if is_contended(&e) => {
                tracing::error!(path = %data_dir.display(), "Data directory is already open");
                Err(SealError::AlreadyOpen(data_dir.display().to_string()))
            }
            Err(e) => Err(SealError::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release data directory lock");
        } else {
            tracing::debug!(path = %self.path.display(), "Released data directory lock");
        }
    }
}

/// EWOULDBLOCK surfaces as a kind on some platforms and a raw code on others
fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
