use crate::config::types::{Result, SandboxConfig, SandboxError, FAILURE_EXIT_CODE};
use crate::config::validator::validate_config;
use crate::core::preexec::prepare_and_exec;
use crate::core::types::{exit_code_from_status, RunOutcome};
use crate::fs::start_filesystem_proxy;
use crate::kernel::mount::{detach_mounts_under, harden_mount_propagation};
use crate::kernel::namespace::{
    probe_plan, spawn_in_namespaces, wait_for_exit, CloneProber, NamespaceKind, NamespacePlan,
    NamespaceProber,
};
use log::{debug, error, warn};

/// Run the sandbox for `config` and return the exit code to report.
pub fn run(config: &SandboxConfig) -> Result<i32> {
    run_with_prober(config, &CloneProber)
}

/// As [`run`], with namespace support checked through `prober`.
pub fn run_with_prober<P: NamespaceProber + ?Sized>(config: &SandboxConfig, prober: &P) -> Result<i32> {
    let validation = validate_config(config);
    if !validation.valid {
        return Err(SandboxError::Config(validation.errors.join("\n")));
    }

    let plan = NamespacePlan::for_config(config);
    debug!(
        "namespaces: proxy isolation {:?}, sandbox {:?}",
        plan.proxy_isolation.labels(),
        plan.sandbox.labels()
    );

    // Nothing is created until every namespace is known to work.
    probe_plan(prober, &plan)?;

    if !plan.needs_outer_clone() {
        return run_inner(config, &plan).map(|outcome| outcome.exit_code());
    }

    let outer = spawn_in_namespaces(
        plan.proxy_isolation,
        Box::new(|| outer_child(config, &plan) as isize),
    )?;
    debug!("outer sandbox process is {}", outer);

    let status = wait_for_exit(outer)?;
    Ok(exit_code_from_status(status))
}

/// Entry point of the outer clone: owns a private mount+PID namespace pair.
fn outer_child(config: &SandboxConfig, plan: &NamespacePlan) -> i32 {
    if let Err(e) = harden_mount_propagation() {
        error!("{}", e);
        return FAILURE_EXIT_CODE;
    }

    match run_inner(config, plan) {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            error!("{}", e);
            FAILURE_EXIT_CODE
        }
    }
}

/// Start the proxy if needed, run the command in the sandbox namespaces,
/// then tear the proxy down.
pub fn run_inner(config: &SandboxConfig, plan: &NamespacePlan) -> Result<RunOutcome> {
    let proxy = if config.toggles.filesystem {
        Some(start_filesystem_proxy(config)?)
    } else {
        None
    };

    let owns_mount_namespace = plan.sandbox.contains(NamespaceKind::Mount);
    let command_pid = spawn_in_namespaces(
        plan.sandbox,
        Box::new(move || {
            let err = prepare_and_exec(config, owns_mount_namespace);
            error!("{}", err);
            FAILURE_EXIT_CODE as isize
        }),
    )?;
    debug!("sandboxed command is pid {}", command_pid);

    let command_status = wait_for_exit(command_pid)?;

    // A command sharing this mount namespace left its remounts on the proxy mount.
    if proxy.is_some() {
        if let Err(e) = detach_mounts_under(&config.mount_point) {
            warn!("fuse: {}", e);
        }
    }

    let proxy_status = match proxy {
        Some(proxy) => proxy.terminate().unwrap_or_else(|e| {
            warn!("fuse: {}", e);
            None
        }),
        None => None,
    };

    Ok(RunOutcome {
        command_pid,
        command_status,
        proxy_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{IsolationToggles, ProxyOptions};
    use nix::errno::Errno;
    use std::cell::Cell;
    use std::path::PathBuf;

    struct CountingProber {
        calls: Cell<usize>,
        result: std::result::Result<(), Errno>,
    }

    impl NamespaceProber for CountingProber {
        fn try_create(&self, _kind: NamespaceKind) -> std::result::Result<(), Errno> {
            self.calls.set(self.calls.get() + 1);
            self.result
        }
    }

    fn unisolated(command: &[&str]) -> SandboxConfig {
        SandboxConfig::build(
            IsolationToggles::none(),
            command.iter().map(|s| s.to_string()).collect(),
            PathBuf::from("/tmp/sandbox-fuse-unused"),
            Vec::new(),
            ProxyOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn probe_failure_aborts_before_any_process() {
        let config = SandboxConfig::build(
            IsolationToggles::all(),
            vec!["true".to_string()],
            PathBuf::from("/tmp/sandbox-fuse-unused"),
            Vec::new(),
            ProxyOptions::default(),
        )
        .unwrap();
        let prober = CountingProber {
            calls: Cell::new(0),
            result: Err(Errno::EPERM),
        };

        let err = run_with_prober(&config, &prober).unwrap_err();
        assert!(matches!(err, SandboxError::MissingPrivilege { .. }));
        assert_eq!(prober.calls.get(), 1);
    }

    #[test]
    fn inner_run_reports_command_status() {
        let config = unisolated(&["sh", "-c", "exit 7"]);
        let plan = NamespacePlan::for_config(&config);
        let outcome = run_inner(&config, &plan).unwrap();
        assert_eq!(outcome.exit_code(), 7);
        assert!(outcome.proxy_status.is_none());
    }

    #[test]
    fn exec_failure_is_failure_code() {
        let config = unisolated(&["/nonexistent/rsandbox-command"]);
        let prober = CountingProber {
            calls: Cell::new(0),
            result: Ok(()),
        };
        assert_eq!(run_with_prober(&config, &prober).unwrap(), FAILURE_EXIT_CODE);
        assert_eq!(prober.calls.get(), 0);
    }
}
