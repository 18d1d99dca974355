//! Signal plumbing for the proxy lifecycle
//!
//! The proxy blocks its termination signals before the FUSE session starts
//! (so every thread inherits the mask) and then waits for one synchronously.
//! No handler runs in async-signal context.

use crate::config::types::{Result, SandboxError};
use log::debug;
use nix::sys::signal::{self, SigSet, SigmaskHow, Signal};
use nix::unistd::Pid;

/// Signals that end the proxy's serving loop.
pub const TERMINATION_SIGNALS: [Signal; 3] = [Signal::SIGTERM, Signal::SIGINT, Signal::SIGHUP];

fn termination_set() -> SigSet {
    let mut mask = SigSet::empty();
    for sig in TERMINATION_SIGNALS {
        mask.add(sig);
    }
    mask
}

/// Blocked termination signals, to be consumed by [`TerminationSignals::wait`].
pub struct TerminationSignals {
    mask: SigSet,
}

impl TerminationSignals {
    /// Block SIGTERM, SIGINT and SIGHUP for the calling thread and any thread
    /// it spawns afterwards.
    pub fn block() -> Result<Self> {
        let mask = termination_set();
        signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).map_err(|e| {
            SandboxError::Process(format!("Failed to block termination signals: {}", e))
        })?;
        Ok(Self { mask })
    }

    /// Block until one of the termination signals is pending and consume it.
    pub fn wait(&self) -> Result<Signal> {
        let sig = self
            .mask
            .wait()
            .map_err(|e| SandboxError::Process(format!("sigwait: {}", e)))?;
        debug!("Received {}", sig);
        Ok(sig)
    }
}

/// Deliver `sig` to this process when its parent exits.
pub fn set_parent_death_signal(sig: Signal) -> Result<()> {
    nix::sys::prctl::set_pdeathsig(sig)
        .map_err(|e| SandboxError::Process(format!("Failed to set PR_SET_PDEATHSIG: {}", e)))
}

/// Ask a process to terminate gracefully.
pub fn request_termination(pid: Pid) -> Result<()> {
    signal::kill(pid, Signal::SIGTERM)
        .map_err(|e| SandboxError::Process(format!("kill({}, SIGTERM): {}", pid, e)))
}
