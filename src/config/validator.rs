// Config validation
// A sandbox configuration is validated once, before any process exists, and
// rejected outright if it would produce a partially isolated sandbox.

use crate::config::types::{
    IsolationToggles, ProxyOptions, Result, SandboxConfig, SandboxError,
};
use std::path::PathBuf;

/// Validation result with detailed errors
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxConfig {
    /// Build and validate the configuration, computing the derived flags.
    ///
    /// Fails with [`SandboxError::Config`] when validation reports any error;
    /// warnings are logged.
    pub fn build(
        toggles: IsolationToggles,
        command: Vec<String>,
        mount_point: PathBuf,
        writable_roots: Vec<PathBuf>,
        proxy: ProxyOptions,
    ) -> Result<Self> {
        let config = Self {
            toggles,
            mount_proc: toggles.mount && toggles.process,
            clone_for_proxy: toggles.filesystem && toggles.process,
            command,
            mount_point,
            writable_roots,
            proxy,
        };

        let result = validate_config(&config);
        for warning in &result.warnings {
            log::warn!("{}", warning);
        }
        if !result.is_valid() {
            return Err(SandboxError::Config(result.errors.join("\n")));
        }

        Ok(config)
    }
}

/// Validate a sandbox configuration.
pub fn validate_config(config: &SandboxConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_toggles(config, &mut result);
    validate_command(config, &mut result);
    validate_paths(config, &mut result);

    result
}

fn validate_toggles(config: &SandboxConfig, result: &mut ValidationResult) {
    if config.toggles.filesystem && !config.toggles.mount {
        result.add_error(
            "filesystem sandbox requires mount sandbox.\n\
             Try adding --mount to the sandbox arguments."
                .to_string(),
        );
    }

    if !config.toggles.filesystem && !config.writable_roots.is_empty() {
        result.add_warning(format!(
            "{} writable path(s) ignored: filesystem sandbox is disabled",
            config.writable_roots.len()
        ));
    }
}

fn validate_command(config: &SandboxConfig, result: &mut ValidationResult) {
    match config.command.first() {
        None => result.add_error("Not enough arguments: no command given".to_string()),
        Some(program) if program.is_empty() => {
            result.add_error("command name cannot be empty".to_string())
        }
        Some(_) => {}
    }

    if config.command.iter().any(|arg| arg.contains('\0')) {
        result.add_error("command contains NUL byte".to_string());
    }
}

fn validate_paths(config: &SandboxConfig, result: &mut ValidationResult) {
    // Without mount isolation there is no mount point; validate_toggles reports it.
    if config.toggles.filesystem && config.toggles.mount && !config.mount_point.is_absolute() {
        result.add_error(format!(
            "mount point must be absolute path: {:?}",
            config.mount_point
        ));
    }

    for root in &config.writable_roots {
        if !root.is_absolute() {
            result.add_error(format!("writable path must be absolute: {:?}", root));
            continue;
        }
        if config.toggles.filesystem
            && !config.mount_point.as_os_str().is_empty()
            && root.starts_with(&config.mount_point)
        {
            result.add_warning(format!(
                "writable path {:?} lies under the hidden mount point and has no effect",
                root
            ));
        }
    }
}
