//! Configuration
//!
//! Sandbox configuration, validation and profile loading.

pub mod profile;
pub mod types;
pub mod validator;
