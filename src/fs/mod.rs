//! Filesystem access-control proxy.
//!
//! The proxy is a forked process serving a FUSE mount that mirrors `/`. It
//! reports readiness over a one-shot pipe and runs until it receives a
//! termination signal, at which point it unmounts and exits.

pub mod access;
pub mod proxy;
pub mod readiness;
pub mod xattr;

use crate::config::types::{Result, SandboxConfig, SandboxError, FAILURE_EXIT_CODE};
use crate::kernel::namespace::wait_for_exit;
use crate::kernel::signal::{request_termination, set_parent_death_signal, TerminationSignals};
use fuse_mt::FuseMT;
use log::{debug, error, warn};
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::{fork, ForkResult, Pid};
use std::ffi::{CStr, OsStr, OsString};

use self::proxy::SandboxFs;
use self::readiness::ReadinessSender;

/// Name shown for the proxy in process listings.
pub const PROXY_PROCESS_NAME: &CStr = c"sandbox [fuse]";

/// Filesystem name reported in the mount table.
pub const FS_NAME: &str = "rsandbox";

fn to_proxy_error(prefix: &str, err: impl std::fmt::Display) -> SandboxError {
    SandboxError::ProxyStartup(format!("{prefix}: {err}"))
}

/// The running proxy process. Terminated and reaped exactly once, either by
/// [`ProxyHandle::terminate`] or on drop.
#[derive(Debug)]
pub struct ProxyHandle {
    pid: Option<Pid>,
}

impl ProxyHandle {
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// Ask the proxy to unmount and exit, then wait for it. A nonzero exit is
    /// logged and otherwise ignored.
    pub fn terminate(mut self) -> Result<Option<WaitStatus>> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<Option<WaitStatus>> {
        let Some(pid) = self.pid.take() else {
            return Ok(None);
        };

        debug!("fuse: terminating proxy {}", pid);
        if let Err(e) = request_termination(pid) {
            warn!("{}", e);
        }

        let status = wait_for_exit(pid)?;
        if status != WaitStatus::Exited(pid, 0) {
            warn!("fuse process exited with status {:?}", status);
        }
        Ok(Some(status))
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("fuse: teardown failed: {}", e);
        }
    }
}

/// Fork the proxy and block until it is mounted and serving.
///
/// On any start-up failure the child is terminated and reaped before the
/// error is returned.
pub fn start_filesystem_proxy(config: &SandboxConfig) -> Result<ProxyHandle> {
    let (sender, receiver) = readiness::channel()?;

    // SAFETY: the orchestrator is single-threaded at this point; the child
    // only runs the proxy and exits without returning into the caller.
    match unsafe { fork() }.map_err(|e| to_proxy_error("fuse fork", e))? {
        ForkResult::Child => {
            drop(receiver);
            let code = match serve(config, sender) {
                Ok(()) => 0,
                Err(e) => {
                    error!("fuse: {}", e);
                    FAILURE_EXIT_CODE
                }
            };
            std::process::exit(code);
        }
        ForkResult::Parent { child } => {
            drop(sender);
            debug!("fuse: reading status from child {}...", child);
            let handle = ProxyHandle { pid: Some(child) };
            receiver.wait()?;
            debug!("fuse: proxy {} is serving {}", child, config.mount_point.display());
            Ok(handle)
        }
    }
}

/// Options handed to the FUSE mount. Each entry is one mount option on its
/// own (`name` or `name=value`), not a command-line style `-o` pair.
fn mount_options() -> Vec<OsString> {
    vec![OsString::from(format!("fsname={}", FS_NAME))]
}

/// Body of the proxy process.
fn serve(config: &SandboxConfig, readiness: ReadinessSender) -> Result<()> {
    if let Err(e) = nix::sys::prctl::set_name(PROXY_PROCESS_NAME) {
        warn!("fuse: could not set process name: {}", e);
    }
    set_parent_death_signal(Signal::SIGTERM)?;

    // Blocked before the session thread exists so it inherits the mask.
    let signals = TerminationSignals::block()?;

    let fs = SandboxFs::new(config, Some(readiness));
    let options = mount_options();
    let options: Vec<&OsStr> = options.iter().map(OsString::as_os_str).collect();

    let session = fuse_mt::spawn_mount(FuseMT::new(fs, 0), &config.mount_point, &options)
        .map_err(|e| to_proxy_error(&format!("mount {}", config.mount_point.display()), e))?;

    let sig = signals.wait()?;
    debug!("fuse: {} received, unmounting", sig);
    drop(session);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{IsolationToggles, ProxyOptions};
    use std::path::PathBuf;

    #[test]
    fn handle_without_process_is_a_no_op() {
        let handle = ProxyHandle { pid: None };
        assert!(handle.terminate().unwrap().is_none());
    }

    #[test]
    fn mount_options_are_bare_options() {
        let options = mount_options();
        assert_eq!(options, vec![OsString::from("fsname=rsandbox")]);
        assert!(options
            .iter()
            .all(|option| !option.to_string_lossy().starts_with('-')));
    }

    #[test]
    fn mount_failure_surfaces_as_startup_error() {
        // A mount point that does not exist can never be mounted, with or
        // without privilege, so the proxy exits before signalling readiness.
        let config = SandboxConfig::build(
            IsolationToggles::none(),
            vec!["true".to_string()],
            PathBuf::from("/nonexistent/rsandbox-mount"),
            Vec::new(),
            ProxyOptions::default(),
        )
        .unwrap();

        let err = start_filesystem_proxy(&config).unwrap_err();
        assert!(matches!(err, SandboxError::ProxyStartup(_)));
    }
}
