use crate::error::PipelineError;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const LOCK_FILE_NAME: &str = "register-stac.lock";

/// Exclusive claim on an output directory, held for the duration of a run.
///
/// The lock file holds the owning process id and is removed when the guard
/// is dropped.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Creates the lock file in `dir`, failing with [`PipelineError::Locked`]
    /// when it already exists.
    pub fn acquire(dir: &Path) -> Result<Self, PipelineError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);
        let mut file = match File::create_new(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(PipelineError::Locked(path));
            }
            Err(err) => return Err(err.into()),
        };
        // Own the file before writing so a failed write still cleans up.
        let lock = Self { path };
        write!(file, "{}", std::process::id())?;
        info!(path = %lock.path.display(), "lock acquired");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "lock released"),
            Err(err) => warn!(path = %self.path.display(), error = %err, "unable to remove lock file"),
        }
    }
}
