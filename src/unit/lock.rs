use crate::error::UnitError;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;

/// Exclusive advisory lock held for the duration of one load-mutate-persist sequence.
///
/// The lock lives on the open file handle, not on the file's existence: the kernel
/// drops it when the handle is closed or the process dies, so a crashed writer never
/// leaves the unit locked. A second writer fails immediately instead of waiting.
#[derive(Debug)]
pub struct UnitLock {
    path: Utf8PathBuf,
    file: File,
}

impl UnitLock {
    pub fn acquire(path: &Utf8Path, unit: &str) -> Result<Self, UnitError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                tracing::warn!("Unit {} is locked ({})", unit, path);
                return Err(UnitError::Locked(unit.to_string()));
            }
            Err(TryLockError::Error(err)) => return Err(err.into()),
        }

        // Owner pid, for whoever is looking at a busy unit.
        file.set_len(0)?;
        let mut writer = &file;
        let _ = writeln!(writer, "{}", std::process::id());

        tracing::debug!("Acquired lock {}", path);
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for UnitLock {
    fn drop(&mut self) {
        match self.file.unlock() {
            Ok(()) => tracing::debug!("Released lock {}", self.path),
            Err(err) => tracing::warn!("Failed to release lock {}: {}", self.path, err),
        }
    }
}
