//! Scoped runtime resources
//!
//! The PID lock file and the scratch working directory are guards: they are
//! released when dropped, on every exit path including cancellation.
//! [`Interrupt`] carries a received termination signal into the workflow,
//! which checks it between sub-steps. [`Tally`] remembers whether any warning
//! or error was reported and turns that into the process exit code.

use crate::error::{ExitCode, ProvisionError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cancellation flag set from a signal listener
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    signal: Arc<AtomicI32>,
}

impl Interrupt {
    /// Create an untriggered flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received signal; the first one wins
    pub fn trigger(&self, signo: i32) {
        let _ = self
            .signal
            .compare_exchange(0, signo, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Signal received so far, if any
    pub fn signal(&self) -> Option<i32> {
        match self.signal.load(Ordering::SeqCst) {
            0 => None,
            signo => Some(signo),
        }
    }

    /// Fail with [`ProvisionError::Interrupted`] once a signal was received
    pub fn check(&self) -> Result<()> {
        match self.signal() {
            Some(signo) => Err(ProvisionError::Interrupted(signo)),
            None => Ok(()),
        }
    }
}

/// PID file detecting a concurrently running instance
///
/// Checked at startup and removed on drop; it is not a mutex held across
/// the run.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    pid: u32,
}

impl LockFile {
    /// Acquire the lock, replacing a stale file left by a dead process
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pid = std::process::id();

        if let Ok(contents) = fs::read_to_string(&path) {
            match contents.trim().parse::<u32>() {
                Ok(other) if other != pid && process_alive(other) => {
                    return Err(ProvisionError::Lock(format!(
                        "Another instance is running (pid {}, lock file {})",
                        other,
                        path.display()
                    )));
                }
                _ => info!(path = %path.display(), "Replacing stale lock file"),
            }
        }

        fs::write(&path, format!("{}\n", pid)).map_err(|e| {
            ProvisionError::Lock(format!("Cannot write lock file {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), pid, "Lock acquired");
        Ok(Self { path, pid })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let ours = fs::read_to_string(&self.path)
            .map(|c| c.trim() == self.pid.to_string())
            .unwrap_or(false);
        if !ours {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Lock released"),
            Err(e) => warn!(path = %self.path.display(), "Failed to remove lock file: {}", e),
        }
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Scratch working directory, deleted on drop
#[derive(Debug)]
pub struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    /// Create a fresh scratch directory under the system temp dir
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("wg-provision.").tempdir()?;
        debug!(path = %dir.path().display(), "Created scratch directory");
        Ok(Self { dir })
    }

    /// Create a scratch directory inside `parent`
    pub fn create_in<P: AsRef<Path>>(parent: P) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("wg-provision.")
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    /// Path of the scratch directory
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a file inside the scratch directory
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        debug!(path = %self.dir.path().display(), "Removing scratch directory");
    }
}

/// Warning and error accounting for the exit code
#[derive(Debug, Clone, Default)]
pub struct Tally {
    warning: Arc<AtomicBool>,
    error: Arc<AtomicBool>,
}

impl Tally {
    /// Create an empty tally
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a warning was reported
    pub fn warn(&self) {
        self.warning.store(true, Ordering::SeqCst);
    }

    /// Record that an error was reported
    pub fn error(&self) {
        self.error.store(true, Ordering::SeqCst);
    }

    /// Whether a warning was reported
    pub fn has_warning(&self) -> bool {
        self.warning.load(Ordering::SeqCst)
    }

    /// Whether an error was reported
    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }

    /// Exit code for the run, given the signal that cancelled it (if any)
    pub fn exit_code(&self, signal: Option<i32>) -> ExitCode {
        ExitCode {
            warning: self.has_warning(),
            error: self.has_error(),
            signal,
        }
    }
}
