//! End-to-end orchestration tests.
//!
//! Runs without isolation work for any user. The filesystem proxy tests need
//! root and /dev/fuse and skip themselves otherwise.

use rsandbox::config::types::{
    IsolationToggles, ProxyOptions, SandboxConfig, SandboxError, FAILURE_EXIT_CODE,
};
use rsandbox::core::supervisor;
use rsandbox::kernel::namespace::{probe, CloneProber, NamespaceKind};
use rsandbox::safety::workspace::MountPointGuard;
use std::path::{Path, PathBuf};

fn command(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn unisolated(args: &[&str]) -> SandboxConfig {
    SandboxConfig::build(
        IsolationToggles::none(),
        command(args),
        PathBuf::new(),
        Vec::new(),
        ProxyOptions::default(),
    )
    .unwrap()
}

fn privileged() -> bool {
    nix::unistd::geteuid().is_root()
        && Path::new("/dev/fuse").exists()
        && probe(&CloneProber, NamespaceKind::Mount).is_ok()
}

#[test]
fn command_exit_code_propagates() {
    let config = unisolated(&["sh", "-c", "exit 7"]);
    assert_eq!(supervisor::run(&config).unwrap(), 7);
}

#[test]
fn signal_death_maps_to_failure_code() {
    let config = unisolated(&["sh", "-c", "kill -9 $$"]);
    assert_eq!(supervisor::run(&config).unwrap(), FAILURE_EXIT_CODE);
}

#[test]
fn missing_command_is_failure_code() {
    let config = unisolated(&["/nonexistent/rsandbox-command"]);
    assert_eq!(supervisor::run(&config).unwrap(), FAILURE_EXIT_CODE);
}

#[test]
fn filesystem_without_mount_is_rejected() {
    let toggles = IsolationToggles {
        filesystem: true,
        ..IsolationToggles::none()
    };
    let err = SandboxConfig::build(
        toggles,
        command(&["true"]),
        PathBuf::new(),
        Vec::new(),
        ProxyOptions::default(),
    )
    .unwrap_err();

    assert!(matches!(err, SandboxError::Config(_)));
    assert_eq!(err.exit_code(), 3);
    assert!(err.to_string().contains("--mount"));
}

#[test]
fn unprivileged_namespaces_fail_before_running_anything() {
    if nix::unistd::geteuid().is_root() {
        eprintln!("skipping: running as root");
        return;
    }
    let marker = tempfile::tempdir().unwrap();
    let touched = marker.path().join("ran");

    let config = SandboxConfig::build(
        IsolationToggles {
            filesystem: false,
            ..IsolationToggles::all()
        },
        command(&["touch", touched.to_str().unwrap()]),
        PathBuf::new(),
        Vec::new(),
        ProxyOptions::default(),
    )
    .unwrap();

    // Without CAP_SYS_ADMIN the probes refuse; the command must never run.
    if let Err(err) = supervisor::run(&config) {
        assert_eq!(err.exit_code(), FAILURE_EXIT_CODE);
        assert!(!touched.exists());
    }
}

#[test]
fn filesystem_proxy_enforces_policy() {
    if !privileged() {
        eprintln!("skipping: needs root and /dev/fuse");
        return;
    }

    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().canonicalize().unwrap();
    std::fs::create_dir(root.join("work")).unwrap();
    std::fs::create_dir(root.join("ro")).unwrap();
    std::fs::write(root.join("ro/data"), b"keep").unwrap();

    let guard = MountPointGuard::create().unwrap();
    let toggles = IsolationToggles {
        filesystem: true,
        mount: true,
        ..IsolationToggles::none()
    };
    let script = r#"
        echo ok > "$1/work/out.txt" || exit 10
        if (echo x > "$1/ro/data"); then exit 11; fi
        cat "$1/ro/data" > "$1/work/copy" || exit 12
        if test -e "$2"; then exit 13; fi
        exit 0
    "#;
    let config = SandboxConfig::build(
        toggles,
        command(&[
            "sh",
            "-c",
            script,
            "sh",
            root.to_str().unwrap(),
            guard.path().to_str().unwrap(),
        ]),
        guard.path().to_path_buf(),
        vec![root.join("work")],
        ProxyOptions::default(),
    )
    .unwrap();

    assert_eq!(supervisor::run(&config).unwrap(), 0);
    assert_eq!(std::fs::read(root.join("work/out.txt")).unwrap(), b"ok\n");
    assert_eq!(std::fs::read(root.join("ro/data")).unwrap(), b"keep");
    assert_eq!(std::fs::read(root.join("work/copy")).unwrap(), b"keep");

    // The proxy has been terminated and unmounted: the mount point is empty again.
    assert_eq!(std::fs::read_dir(guard.path()).unwrap().count(), 0);
}

#[test]
fn full_isolation_runs_behind_proxy() {
    if !privileged() || NamespaceKind::ALL.iter().any(|k| probe(&CloneProber, *k).is_err()) {
        eprintln!("skipping: needs root, /dev/fuse and every namespace kind");
        return;
    }

    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().canonicalize().unwrap();
    std::fs::create_dir_all(root.join("work/dir")).unwrap();

    let guard = MountPointGuard::create().unwrap();
    // The command shares the proxy's mount namespace here and remounts /proc
    // and /dev over the FUSE mount.
    let script = r#"
        test -r /proc/self/status || exit 20
        test "$$" = 1 || exit 21
        touch "$1/work/dir" || exit 22
        echo ok > "$1/work/out.txt" || exit 23
        exit 7
    "#;
    let config = SandboxConfig::build(
        IsolationToggles::all(),
        command(&["sh", "-c", script, "sh", root.to_str().unwrap()]),
        guard.path().to_path_buf(),
        vec![root.join("work")],
        ProxyOptions::default(),
    )
    .unwrap();
    assert!(config.clone_for_proxy && config.mount_proc);

    assert_eq!(supervisor::run(&config).unwrap(), 7);
    assert_eq!(std::fs::read(root.join("work/out.txt")).unwrap(), b"ok\n");
    assert_eq!(std::fs::read_dir(guard.path()).unwrap().count(), 0);
}
