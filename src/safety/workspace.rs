/// Scoped temporary directory for the proxy mount point
use crate::config::types::{Result, SandboxError};
use std::fs::DirBuilder;
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Prefix of every mount-point directory name.
pub const MOUNT_POINT_PREFIX: &str = "sandbox-fuse-";

/// Owns a freshly created, uniquely named, empty directory and removes it when
/// dropped, on every exit path of the owning scope.
#[derive(Debug)]
pub struct MountPointGuard {
    path: PathBuf,
}

impl MountPointGuard {
    /// Create the directory under `$TMPDIR` (`/tmp` when unset).
    pub fn create() -> Result<Self> {
        Self::create_in(&std::env::temp_dir())
    }

    pub fn create_in(base: &Path) -> Result<Self> {
        let candidate = base.join(format!("{}{}", MOUNT_POINT_PREFIX, Uuid::new_v4().simple()));

        DirBuilder::new().mode(0o700).create(&candidate).map_err(|e| {
            SandboxError::Filesystem(format!(
                "Failed to create mount point {}: {}",
                candidate.display(),
                e
            ))
        })?;

        // The proxy compares request paths against this one, so it must be
        // canonical even when TMPDIR goes through a symlink.
        let path = match candidate.canonicalize() {
            Ok(path) => path,
            Err(e) => {
                let _ = std::fs::remove_dir(&candidate);
                return Err(SandboxError::Filesystem(format!(
                    "Failed to resolve mount point {}: {}",
                    candidate.display(),
                    e
                )));
            }
        };

        log::debug!("mount point {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MountPointGuard {
    fn drop(&mut self) {
        match std::fs::remove_dir(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}
