use crate::config::types::{Result, SandboxConfig, SandboxError};
use crate::kernel::mount;
/// Set-up of the sandboxed command's process
///
/// Runs inside the freshly cloned command process, before exec. The order is
/// fixed:
/// 1. mount propagation hardening (only when this process owns a new mount namespace)
/// 2. root change into the proxy mount point (filesystem isolation)
/// 3. devtmpfs and proc remounts inside the new root
/// 4. exec
use std::ffi::CString;
use std::marker::PhantomData;
use std::path::Path;

// FreshChild -> MountsPrivate -> RootEntered -> ExecReady
//
// Each step consumes the prior state. Only CommandSetup<ExecReady> can exec.

/// Type-state marker: just cloned, nothing done yet
pub struct FreshChild;

/// Type-state marker: mounts cannot propagate back to the parent namespace
pub struct MountsPrivate;

/// Type-state marker: root is final
pub struct RootEntered;

/// Type-state marker: all gates passed
pub struct ExecReady;

/// The command process with type-state tracking.
pub struct CommandSetup<S> {
    /// This process was created with CLONE_NEWNS
    pub owns_mount_namespace: bool,
    /// Root was changed to the proxy mount point
    pub chrooted: bool,
    _state: PhantomData<S>,
}

impl<S> CommandSetup<S> {
    fn advance<T>(self) -> CommandSetup<T> {
        CommandSetup {
            owns_mount_namespace: self.owns_mount_namespace,
            chrooted: self.chrooted,
            _state: PhantomData,
        }
    }
}

impl CommandSetup<FreshChild> {
    pub fn new(owns_mount_namespace: bool) -> Self {
        Self {
            owns_mount_namespace,
            chrooted: false,
            _state: PhantomData,
        }
    }

    /// Make `/` private before anything is mounted.
    pub fn harden_mount_propagation(self) -> Result<CommandSetup<MountsPrivate>> {
        if self.owns_mount_namespace {
            mount::harden_mount_propagation()?;
        } else {
            log::debug!("Mount namespace inherited; skipping propagation hardening step");
        }
        Ok(self.advance())
    }
}

impl CommandSetup<MountsPrivate> {
    /// Change root to `new_root` when given, keeping the working directory.
    pub fn enter_root(self, new_root: Option<&Path>) -> Result<CommandSetup<RootEntered>> {
        let mut next = self.advance::<RootEntered>();
        if let Some(root) = new_root {
            mount::enter_root(root)?;
            next.chrooted = true;
        }
        Ok(next)
    }
}

impl CommandSetup<RootEntered> {
    /// Bring device nodes and process information back inside the new root.
    pub fn remount_filesystems(self, devices: bool, proc: bool) -> Result<CommandSetup<ExecReady>> {
        if devices {
            mount::remount_all("devtmpfs")?;
        }
        if proc {
            mount::remount_all("proc")?;
        }
        Ok(self.advance())
    }
}

impl CommandSetup<ExecReady> {
    /// Replace the process image. Only returns on failure.
    pub fn exec(self, command: &[String]) -> Result<()> {
        let argv = command_argv(command)?;
        let argv_ref: Vec<&std::ffi::CStr> = argv.iter().map(|c| c.as_c_str()).collect();

        log::debug!("Executing {:?}", command);
        nix::unistd::execvp(argv[0].as_c_str(), &argv_ref)
            .map_err(|e| SandboxError::Process(format!("execvp {}: {}", command[0], e)))?;
        Ok(())
    }
}

/// Build the NUL-terminated argument vector for exec.
pub fn command_argv(command: &[String]) -> Result<Vec<CString>> {
    if command.is_empty() {
        return Err(SandboxError::Config("Empty command for exec".to_string()));
    }
    command
        .iter()
        .map(|arg| {
            CString::new(arg.as_str())
                .map_err(|_| SandboxError::Config("command contains NUL byte".to_string()))
        })
        .collect()
}

/// Full pre-exec sequence for the command process. Only returns on failure.
pub fn prepare_and_exec(config: &SandboxConfig, owns_mount_namespace: bool) -> SandboxError {
    let new_root = config
        .toggles
        .filesystem
        .then_some(config.mount_point.as_path());

    let outcome = CommandSetup::new(owns_mount_namespace)
        .harden_mount_propagation()
        .and_then(|setup| setup.enter_root(new_root))
        .and_then(|setup| setup.remount_filesystems(config.toggles.filesystem, config.mount_proc))
        .and_then(|setup| setup.exec(&config.command));

    match outcome {
        Err(e) => e,
        Ok(()) => SandboxError::Process("execvp returned".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_preserves_arguments() {
        let argv = command_argv(&["echo".to_string(), "a b".to_string()]).unwrap();
        assert_eq!(argv.len(), 2);
        assert_eq!(argv[1].to_str().unwrap(), "a b");
    }

    #[test]
    fn argv_rejects_empty_and_nul() {
        assert!(matches!(command_argv(&[]), Err(SandboxError::Config(_))));
        assert!(command_argv(&["a\0b".to_string()]).is_err());
    }

    #[test]
    fn chain_without_isolation_needs_no_privilege() {
        let setup = CommandSetup::new(false)
            .harden_mount_propagation()
            .unwrap()
            .enter_root(None)
            .unwrap();
        assert!(!setup.chrooted);

        let ready = setup.remount_filesystems(false, false).unwrap();
        assert!(!ready.owns_mount_namespace);
        // Exec is only reachable from CommandSetup<ExecReady>; not invoked here.
    }
}
