//! rsandbox: run a command with a reduced blast radius
//! Linux namespace isolation plus a FUSE proxy that hides its own mount point
//! and only allows writes under declared roots.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::namespace`]: Namespace kinds, creation order and support probing
//! - [`kernel::mount`]: Propagation hardening, root change, remounts
//! - [`kernel::signal`]: Termination signals for the proxy lifecycle
//!
//! ## Filesystem Proxy ([`fs`])
//! - [`fs::access`]: Hidden / read-only / read-write path classification
//! - [`fs::proxy`]: The pass-through FUSE filesystem
//! - [`fs::readiness`]: One-shot readiness handshake
//! - [`fs::xattr`]: `l*xattr` wrappers
//!
//! ## Orchestration ([`core`])
//! - [`core::supervisor`]: Process tree construction and teardown
//! - [`core::preexec`]: Type-state ordered set-up of the command process
//! - [`core::types`]: Exit-status propagation
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Shared types, errors and exit codes
//! - [`config::validator`]: Validation and derived flags
//! - [`config::profile`]: JSON profiles and writable-path parsing
//!
//! ## Safety ([`safety`])
//! - [`safety::workspace`]: Scoped mount-point directory
//!
//! # Design Principles
//!
//! 1. **Probe before commit** - Every namespace is known to work before any real process exists
//! 2. **Handshake, not timing** - The command never starts before the proxy is serving
//! 3. **Types prevent errors** - Pre-exec ordering is a type-state chain
//! 4. **Minimal unsafe** - Thin wrappers in `kernel` and `fs::xattr`

// Kernel Primitives
pub mod kernel;

// Filesystem access-control proxy
pub mod fs;

// Namespace orchestration
pub mod core;

// Safety & Cleanup
pub mod safety;

// Configuration
pub mod config;

// CLI entrypoint wiring for the rsandbox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
