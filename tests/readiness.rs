//! Readiness handshake across a real process boundary.

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use rsandbox::config::types::SandboxError;
use rsandbox::fs::readiness;

#[test]
fn child_signal_unblocks_parent() {
    let (tx, rx) = readiness::channel().unwrap();
    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            drop(rx);
            let code = if tx.signal_ready().is_ok() { 0 } else { 1 };
            unsafe { libc::_exit(code) };
        }
        ForkResult::Parent { child } => {
            drop(tx);
            assert!(rx.wait().is_ok());
            assert_eq!(waitpid(child, None).unwrap(), WaitStatus::Exited(child, 0));
        }
    }
}

#[test]
fn child_exit_without_signal_is_startup_failure() {
    let (tx, rx) = readiness::channel().unwrap();
    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            drop(rx);
            drop(tx);
            unsafe { libc::_exit(3) };
        }
        ForkResult::Parent { child } => {
            drop(tx);
            let err = rx.wait().unwrap_err();
            assert!(matches!(err, SandboxError::ProxyStartup(_)));
            assert_eq!(waitpid(child, None).unwrap(), WaitStatus::Exited(child, 3));
        }
    }
}
