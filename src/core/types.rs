use crate::config::types::FAILURE_EXIT_CODE;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

/// Exit status propagated for a finished process: its own code on a normal
/// exit, the fixed failure code otherwise (signals are not reconstructed).
pub fn exit_code_from_status(status: WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => code,
        _ => FAILURE_EXIT_CODE,
    }
}

/// What happened to the processes of one inner run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    pub command_pid: Pid,
    pub command_status: WaitStatus,
    /// `None` when no proxy ran, or it could not be reaped
    pub proxy_status: Option<WaitStatus>,
}

impl RunOutcome {
    /// Only the command decides the exit code; the proxy never does.
    pub fn exit_code(&self) -> i32 {
        exit_code_from_status(self.command_status)
    }
}
