use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const LOCK_FILE_NAME: &str = ".drive-downloader.lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another run holds the lock at {0}; remove it if no run is active")]
    AlreadyHeld(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Marker-file lock for one working directory. The marker is an empty file
/// whose presence means "locked"; it is removed on [`RunLock::release`] or
/// when the guard is dropped. A marker left behind by a killed process is
/// never expired automatically.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    released: bool,
}

impl RunLock {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(Self {
                path,
                released: false,
            }),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(LockError::AlreadyHeld(path))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn is_locked(path: &Path) -> bool {
        path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
