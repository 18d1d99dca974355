//! Thin wrappers around Linux kernel primitives.
//!
//! `unsafe` code is concentrated here.
//! Dependency direction: signal -> namespace -> mount

pub mod mount;
pub mod namespace;
pub mod signal;
