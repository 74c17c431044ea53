//! Advisory container locks
//!
//! Only used when `file_locking` is enabled. Each container gets a sidecar
//! `<container>.json.lock` file; readers take it shared, writers exclusive.
//! The lock is released when the guard drops.

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use fs2::FileExt;

use crate::error::{CacheError, IoOperation, Result};

/// Lock type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    /// Read lock (shared)
    Read,
    /// Write lock (exclusive)
    Write,
}

/// RAII guard over an OS-level advisory lock
#[derive(Debug)]
pub struct ContainerLock {
    path: PathBuf,
    lock_type: LockType,
    file: File,
}

impl ContainerLock {
    /// Block until a shared lock on `path` is held
    pub fn shared(path: &Path) -> Result<Self> {
        Self::acquire(path, LockType::Read)
    }

    /// Block until an exclusive lock on `path` is held
    pub fn exclusive(path: &Path) -> Result<Self> {
        Self::acquire(path, LockType::Write)
    }

    fn acquire(path: &Path, lock_type: LockType) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::io(parent, IoOperation::Lock, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| CacheError::io(path, IoOperation::Lock, e))?;

        let locked = match lock_type {
            LockType::Read => file.lock_shared(),
            LockType::Write => file.lock_exclusive(),
        };
        locked.map_err(|e| CacheError::Lock {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            lock_type,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }
}

impl Drop for ContainerLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
