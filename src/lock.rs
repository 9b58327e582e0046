//! Single-instance guard for the aggregation phase.
//!
//! The guard is an exclusive `flock` on `aggregate.lock`. The kernel drops
//! it when the holding process exits for any reason, so a run killed by the
//! scheduler never blocks the next one. The file itself stays in place and
//! records the pid of the last holder.

use crate::error::{PipelineError, Result};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[cfg(unix)]
use nix::{
    errno::Errno,
    fcntl::{Flock, FlockArg},
};

/// Lock file name inside the data directory.
pub const LOCK_FILE: &str = "aggregate.lock";

#[cfg(unix)]
type LockedFile = Flock<File>;
#[cfg(not(unix))]
type LockedFile = File;

/// Held while an aggregation runs. Released on drop or process exit.
pub struct RunLock {
    path: PathBuf,
    file: LockedFile,
}

impl RunLock {
    /// Take the lock in `data_dir`, failing fast if another run holds it.
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(LOCK_FILE);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut file = lock_exclusive(file, &path)?;

        let mut previous = String::new();
        file.read_to_string(&mut previous)?;
        if !previous.trim().is_empty() {
            debug!("Previous lock holder {} has exited", previous.trim());
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        debug!("Acquired aggregation lock at {}", path.display());

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn lock_exclusive(file: File, path: &Path) -> Result<LockedFile> {
    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(locked) => Ok(locked),
        Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
            Err(PipelineError::AggregationLocked(path.to_path_buf()))
        }
        Err((_, errno)) => Err(std::io::Error::from(errno).into()),
    }
}

// TODO: take a LockFileEx lock here once the job is scheduled on Windows hosts.
#[cfg(not(unix))]
fn lock_exclusive(file: File, _path: &Path) -> Result<LockedFile> {
    Ok(file)
}

impl fmt::Debug for RunLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLock").field("path", &self.path).finish()
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        debug!("Releasing aggregation lock at {}", self.path.display());
        // Leave the file for the next holder; only the flock matters.
        let _ = self.file.flush();
    }
}
