//! Mount-table operations performed inside the sandbox's process tree

use crate::config::types::{Result, SandboxError};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use std::path::{Path, PathBuf};

/// Table of currently mounted filesystems.
pub const MOUNT_TABLE: &str = "/proc/mounts";

/// Make `/` private and recursive in the current mount namespace.
///
/// Must run right after entering a fresh mount namespace and before any mount
/// or root change, so nothing mounted inside the sandbox reaches the host.
pub fn harden_mount_propagation() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| {
        SandboxError::Filesystem(format!(
            "Failed to harden mount propagation (MS_PRIVATE|MS_REC on /): {}",
            e
        ))
    })?;

    log::debug!("Mount propagation hardened: / set to MS_PRIVATE|MS_REC");
    Ok(())
}

/// Change root to `new_root`, then re-enter the working directory that was
/// current before the change. Failure to re-enter it is only a warning.
pub fn enter_root(new_root: &Path) -> Result<()> {
    let cwd = std::env::current_dir()
        .map_err(|e| SandboxError::Filesystem(format!("getcwd: {}", e)))?;

    nix::unistd::chroot(new_root).map_err(|e| {
        SandboxError::Filesystem(format!("chroot {}: {}", new_root.display(), e))
    })?;

    if let Err(e) = std::env::set_current_dir(&cwd) {
        log::warn!("chdir {}: {}", cwd.display(), e);
    }

    log::debug!(
        "Changed root to {} (cwd {})",
        new_root.display(),
        cwd.display()
    );
    Ok(())
}

/// Decode the octal escapes (`\040` etc.) used for fields of the mount table.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Mount points of every filesystem of `fs_type` listed in `table`, in order.
pub fn mount_points_of_type(table: &str, fs_type: &str) -> Vec<PathBuf> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _source = fields.next()?;
            let target = fields.next()?;
            let kind = fields.next()?;
            (kind == fs_type).then(|| PathBuf::from(unescape_mount_field(target)))
        })
        .collect()
}

/// Mount points listed in `table` strictly below `root`, innermost first.
pub fn mount_points_under(table: &str, root: &Path) -> Vec<PathBuf> {
    let mut targets: Vec<PathBuf> = table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _source = fields.next()?;
            let target = PathBuf::from(unescape_mount_field(fields.next()?));
            (target.starts_with(root) && target != root).then_some(target)
        })
        .collect();
    // Later entries may be stacked on earlier ones.
    targets.reverse();
    targets
}

/// Lazily detach everything mounted below `root`, leaving `root` itself.
///
/// Remounts made by a command that shared this mount namespace keep the FUSE
/// mount busy; they have to go before the proxy can unmount.
pub fn detach_mounts_under(root: &Path) -> Result<()> {
    let table = std::fs::read_to_string(MOUNT_TABLE)
        .map_err(|e| SandboxError::Filesystem(format!("read {}: {}", MOUNT_TABLE, e)))?;

    for target in mount_points_under(&table, root) {
        log::debug!("detaching {}", target.display());
        umount2(&target, MntFlags::MNT_DETACH).map_err(|e| {
            SandboxError::Filesystem(format!("umount {}: {}", target.display(), e))
        })?;
    }

    Ok(())
}

/// Mount a fresh instance of `fs_type` over every place it is currently mounted.
pub fn remount_all(fs_type: &str) -> Result<()> {
    log::debug!("attempting to remount filesystems of type {}", fs_type);

    let table = std::fs::read_to_string(MOUNT_TABLE)
        .map_err(|e| SandboxError::Filesystem(format!("read {}: {}", MOUNT_TABLE, e)))?;

    for target in mount_points_of_type(&table, fs_type) {
        log::debug!("remount {} ({}) ...", target.display(), fs_type);
        mount(
            None::<&str>,
            &target,
            Some(fs_type),
            MsFlags::empty(),
            None::<&str>,
        )
        .map_err(|e| {
            SandboxError::Filesystem(format!("remount {}: {}", target.display(), e))
        })?;
    }

    Ok(())
}
