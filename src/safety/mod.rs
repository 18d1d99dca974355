//! Safety and cleanup
//!
//! Scoped ownership of host artifacts created for a run.

pub mod workspace;
