//! Mount namespace helpers
//!
//! Propagation hardening, root changes, pseudo-filesystem remounts and their
//! detachment after the run.

pub mod filesystem;

pub use filesystem::{
    detach_mounts_under, enter_root, harden_mount_propagation, mount_points_of_type,
    mount_points_under, remount_all,
};
