//! One-shot readiness handshake between the proxy and the orchestrator
//!
//! The proxy writes a single native-endian `i32` status (0 = ready) and closes
//! its end. End-of-file before a full status word means the proxy died first.

use crate::config::types::{Result, SandboxError};
use nix::fcntl::OFlag;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::OwnedFd;

/// Status word meaning "mounted and serving".
pub const READY_STATUS: i32 = 0;

const STATUS_LEN: usize = std::mem::size_of::<i32>();

/// Write end, owned by the proxy process.
#[derive(Debug)]
pub struct ReadinessSender {
    fd: OwnedFd,
}

/// Read end, owned by the orchestrator.
#[derive(Debug)]
pub struct ReadinessReceiver {
    fd: OwnedFd,
}

/// Create the channel. Both ends are close-on-exec so the sandboxed command
/// never inherits them.
pub fn channel() -> Result<(ReadinessSender, ReadinessReceiver)> {
    let (read_end, write_end) = nix::unistd::pipe2(OFlag::O_CLOEXEC)
        .map_err(|e| SandboxError::ProxyStartup(format!("readiness pipe: {}", e)))?;
    Ok((
        ReadinessSender { fd: write_end },
        ReadinessReceiver { fd: read_end },
    ))
}

impl ReadinessSender {
    /// Report readiness and close the channel. Consumes the sender, so it can
    /// happen at most once.
    pub fn signal_ready(self) -> std::io::Result<()> {
        self.send_status(READY_STATUS)
    }

    fn send_status(self, status: i32) -> std::io::Result<()> {
        let mut file = File::from(self.fd);
        file.write_all(&status.to_ne_bytes())
    }
}

impl ReadinessReceiver {
    /// Block until the proxy reports in or its end of the channel closes.
    pub fn wait(self) -> Result<()> {
        let mut file = File::from(self.fd);
        let mut buf = [0u8; STATUS_LEN];
        let mut filled = 0;

        while filled < STATUS_LEN {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(SandboxError::ProxyStartup(format!(
                        "reading proxy status: {}",
                        e
                    )))
                }
            }
        }

        match filled {
            0 => Err(SandboxError::ProxyStartup(
                "filesystem proxy exited before it was ready".to_string(),
            )),
            STATUS_LEN => {
                let status = i32::from_ne_bytes(buf);
                log::debug!("fuse: init in child reports {}", status);
                if status == READY_STATUS {
                    Ok(())
                } else {
                    Err(SandboxError::ProxyStartup(format!(
                        "filesystem proxy reported status {}",
                        status
                    )))
                }
            }
            n => Err(SandboxError::ProxyStartup(format!(
                "truncated proxy status ({} of {} bytes)",
                n, STATUS_LEN
            ))),
        }
    }
}
