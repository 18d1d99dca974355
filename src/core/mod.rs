//! Namespace orchestration core.
//!
//! Core owns the process tree: namespace ordering, the proxy's lifecycle, the
//! command's pre-exec set-up and exit-status propagation.

pub mod preexec;
pub mod supervisor;
pub mod types;
