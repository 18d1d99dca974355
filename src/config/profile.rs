//! Profile loading and writable-path resolution

use crate::config::types::{IsolationToggles, Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Defaults read from a JSON profile file; command-line flags override them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxProfile {
    pub net: Option<bool>,
    pub pid: Option<bool>,
    pub mount: Option<bool>,
    pub ipc: Option<bool>,
    pub fs: Option<bool>,
    /// Entries use the same `:`-separated syntax as `--fs-allow`
    pub fs_allow: Vec<String>,
    pub strict_close: bool,
}

impl SandboxProfile {
    /// Load a profile from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!(
                "Failed to read profile {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            SandboxError::Config(format!(
                "Failed to parse profile {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Apply the profile's toggles on top of `base`.
    pub fn apply_toggles(&self, base: IsolationToggles) -> IsolationToggles {
        IsolationToggles {
            network: self.net.unwrap_or(base.network),
            process: self.pid.unwrap_or(base.process),
            mount: self.mount.unwrap_or(base.mount),
            ipc: self.ipc.unwrap_or(base.ipc),
            filesystem: self.fs.unwrap_or(base.filesystem),
        }
    }
}

/// Split an `--fs-allow` argument on `:`; a backslash makes the next
/// character literal.
pub fn split_path_list(arg: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut current = String::new();
    let mut chars = arg.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ':' => paths.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    paths.push(current);

    paths
}

/// Resolve a writable path to canonical absolute form.
pub fn resolve_path(path: &str) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|source| SandboxError::Resolve {
        path: path.to_string(),
        source,
    })
}

/// Split and resolve every `--fs-allow` argument, preserving order.
pub fn resolve_writable_paths<S: AsRef<str>>(args: &[S]) -> Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    for arg in args {
        for path in split_path_list(arg.as_ref()) {
            roots.push(resolve_path(&path)?);
        }
    }
    Ok(roots)
}
