/// Core types and structures for the rsandbox system
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Exit status reported whenever orchestration fails or the sandboxed
/// command does not exit normally.
pub const FAILURE_EXIT_CODE: i32 = 255;

/// Exit status for rejected configurations.
pub const CONFIG_EXIT_CODE: i32 = 3;

/// Exit status when a writable path cannot be resolved.
pub const RESOLVE_EXIT_CODE: i32 = 4;

/// Independent isolation features selected by the operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationToggles {
    /// Network namespace isolation
    pub network: bool,
    /// PID namespace isolation
    pub process: bool,
    /// Mount namespace isolation
    pub mount: bool,
    /// SysV IPC namespace isolation
    pub ipc: bool,
    /// Filesystem access control through the FUSE proxy
    pub filesystem: bool,
}

impl IsolationToggles {
    /// Every feature enabled (the command-line default)
    pub fn all() -> Self {
        Self {
            network: true,
            process: true,
            mount: true,
            ipc: true,
            filesystem: true,
        }
    }

    /// Every feature disabled
    pub fn none() -> Self {
        Self {
            network: false,
            process: false,
            mount: false,
            ipc: false,
            filesystem: false,
        }
    }
}

impl Default for IsolationToggles {
    fn default() -> Self {
        Self::all()
    }
}

/// How the proxy treats a failing close() after a successful positioned write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClosePolicy {
    /// Report the byte count; the close failure is only logged.
    #[default]
    #[serde(rename = "suppress")]
    Suppress,
    /// Report the close failure instead of the byte count.
    #[serde(rename = "strict")]
    Strict,
}

/// Tunables for the filesystem proxy that do not affect isolation decisions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyOptions {
    /// Close-error handling on the write path
    pub close_policy: ClosePolicy,
    /// Trace individual FUSE requests
    pub trace_requests: bool,
}

/// Sandbox configuration. Built once by [`SandboxConfig::build`] and read-only
/// for the rest of the run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub toggles: IsolationToggles,
    /// `/proc` must be remounted inside the sandbox (mount && process)
    pub mount_proc: bool,
    /// The proxy runs in its own mount+PID namespace pair (filesystem && process)
    pub clone_for_proxy: bool,
    /// Command and arguments; never empty
    pub command: Vec<String>,
    /// Proxy mount point (absolute)
    pub mount_point: PathBuf,
    /// Canonical absolute writable roots, in operator order
    pub writable_roots: Vec<PathBuf>,
    pub proxy: ProxyOptions,
}

/// Custom error types for rsandbox
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Could not resolve {path}: {source}")]
    Resolve {
        path: String,
        source: std::io::Error,
    },

    #[error(
        "{kind} namespace: permission denied for clone() with {flag}; rsandbox should have the CAP_SYS_ADMIN capability"
    )]
    MissingPrivilege { kind: String, flag: String },

    #[error("{} namespace: your kernel does not support clone() with {}{}", .kind, .flag, feature_hint(.feature))]
    KernelUnsupported {
        kind: String,
        flag: String,
        feature: Option<String>,
    },

    #[error("{kind} namespace: clone() with {flag} failed: {errno}")]
    NamespaceProbe {
        kind: String,
        flag: String,
        errno: Errno,
    },

    #[error("Filesystem proxy start-up failed: {0}")]
    ProxyStartup(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),
}

fn feature_hint(feature: &Option<String>) -> String {
    match feature {
        Some(feature) => format!("; kernel should be configured with {}", feature),
        None => String::new(),
    }
}

impl SandboxError {
    /// Process exit status reported for this error at the top level.
    pub fn exit_code(&self) -> i32 {
        match self {
            SandboxError::Config(_) => CONFIG_EXIT_CODE,
            SandboxError::Resolve { .. } => RESOLVE_EXIT_CODE,
            _ => FAILURE_EXIT_CODE,
        }
    }
}

impl From<Errno> for SandboxError {
    fn from(err: Errno) -> Self {
        SandboxError::Process(err.to_string())
    }
}

/// Result type alias for rsandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(SandboxError::Config("x".into()).exit_code(), 3);
        let resolve = SandboxError::Resolve {
            path: "/nope".into(),
            source: std::io::Error::from_raw_os_error(libc::ENOENT),
        };
        assert_eq!(resolve.exit_code(), 4);
        assert_eq!(
            SandboxError::ProxyStartup("closed".into()).exit_code(),
            FAILURE_EXIT_CODE
        );
    }

    #[test]
    fn kernel_unsupported_message_names_feature() {
        let err = SandboxError::KernelUnsupported {
            kind: "network".into(),
            flag: "CLONE_NEWNET".into(),
            feature: Some("CONFIG_NET_NS".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("CLONE_NEWNET"));
        assert!(msg.contains("CONFIG_NET_NS"));

        let err = SandboxError::KernelUnsupported {
            kind: "mount".into(),
            flag: "CLONE_NEWNS".into(),
            feature: None,
        };
        assert!(!err.to_string().contains("configured with"));
    }

    #[test]
    fn missing_privilege_mentions_capability() {
        let err = SandboxError::MissingPrivilege {
            kind: "pid".into(),
            flag: "CLONE_NEWPID".into(),
        };
        assert!(err.to_string().contains("CAP_SYS_ADMIN"));
    }

    #[test]
    fn default_toggles_enable_everything() {
        let toggles = IsolationToggles::default();
        assert_eq!(toggles, IsolationToggles::all());
        assert!(!IsolationToggles::none().filesystem);
    }
}
