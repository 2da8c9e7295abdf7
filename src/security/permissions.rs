//! File permission enforcement for written configuration
//!
//! Generated files carry private keys, so they are created with owner-only
//! permissions from the start instead of being fixed up afterwards.

use crate::error::{ProvisionError, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Secure file mode requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureFileMode {
    /// Files containing private keys (0600)
    PrivateKey,
    /// Directories holding generated files (0700)
    Directory,
}

impl SecureFileMode {
    /// Get the permission mode
    #[cfg(unix)]
    pub fn mode(&self) -> u32 {
        match self {
            Self::PrivateKey => 0o600,
            Self::Directory => 0o700,
        }
    }

    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::PrivateKey => "0600 (owner read/write only)",
            Self::Directory => "0700 (owner only)",
        }
    }
}

/// Create a new file with secure permissions, failing if it already exists
pub fn write_new(path: &Path, contents: &[u8], mode: SecureFileMode) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode.mode());
    }

    let mut file = options.open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            ProvisionError::AlreadyExists(format!("{} already exists", path.display()))
        } else {
            ProvisionError::Io(e)
        }
    })?;
    file.write_all(contents)?;
    file.sync_all()?;

    debug!("Created {:?} with mode {}", path, mode.description());
    Ok(())
}

/// Replace a file atomically via a temporary file in the same directory
pub fn write_atomic(path: &Path, contents: &[u8], mode: SecureFileMode) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode.mode()))?;
    }

    tmp.persist(path).map_err(|e| ProvisionError::Io(e.error))?;
    debug!("Replaced {:?} atomically with mode {}", path, mode.description());
    Ok(())
}

/// Create a directory (and parents) with secure permissions if missing
pub fn ensure_directory(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(SecureFileMode::Directory.mode());
    }

    builder.create(path)?;
    debug!("Created directory {:?}", path);
    Ok(())
}
