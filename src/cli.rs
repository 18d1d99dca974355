use crate::config::profile::{resolve_writable_paths, SandboxProfile};
use crate::config::types::{
    ClosePolicy, IsolationToggles, ProxyOptions, SandboxConfig, SandboxError, FAILURE_EXIT_CODE,
};
use crate::core::supervisor;
use crate::safety::workspace::MountPointGuard;
use anyhow::{Context, Result};
use clap::{ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "rsandbox",
    version,
    about = "Run a command with namespace isolation and filesystem access control",
    long_about = None
)]
struct Cli {
    /// Increase diagnostic output (repeatable; -dd also traces FUSE requests)
    #[arg(short, long, action = ArgAction::Count)]
    debug: u8,

    /// Disable every sandbox feature; later options may re-enable some
    #[arg(long)]
    none: bool,

    /// Network namespace isolation
    #[arg(long)]
    net: bool,
    #[arg(long)]
    no_net: bool,

    /// PID namespace isolation
    #[arg(long)]
    pid: bool,
    #[arg(long)]
    no_pid: bool,

    /// Mount namespace isolation
    #[arg(long)]
    mount: bool,
    #[arg(long)]
    no_mount: bool,

    /// SysV IPC namespace isolation
    #[arg(long)]
    ipc: bool,
    #[arg(long)]
    no_ipc: bool,

    /// Filesystem access control (requires --mount)
    #[arg(long)]
    fs: bool,
    #[arg(long)]
    no_fs: bool,

    /// Allow writes under PATH; ':'-separated, '\' escapes the next character
    #[arg(long = "fs-allow", value_name = "PATH")]
    fs_allow: Vec<String>,

    /// JSON file with default toggles and writable paths
    #[arg(long, value_name = "FILE")]
    profile: Option<PathBuf>,

    /// Report close() failures after a successful write instead of ignoring them
    #[arg(long)]
    strict_close: bool,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

/// Feature toggles as (enable flag id, disable flag id, setter).
const TOGGLE_FLAGS: [(&str, &str, fn(&mut IsolationToggles, bool)); 5] = [
    ("net", "no_net", |t, on| t.network = on),
    ("pid", "no_pid", |t, on| t.process = on),
    ("mount", "no_mount", |t, on| t.mount = on),
    ("ipc", "no_ipc", |t, on| t.ipc = on),
    ("fs", "no_fs", |t, on| t.filesystem = on),
];

fn last_index(matches: &ArgMatches, id: &str) -> Option<usize> {
    if !matches.get_flag(id) {
        return None;
    }
    matches.indices_of(id).and_then(|indices| indices.max())
}

/// Apply `--none`, `--x` and `--no-x` on top of `base`; for each feature the
/// option that appears last on the command line wins.
fn resolve_toggles(matches: &ArgMatches, base: IsolationToggles) -> IsolationToggles {
    let none_at = last_index(matches, "none");
    let mut toggles = base;

    for (enable, disable, set) in TOGGLE_FLAGS {
        let candidates = [
            (none_at, false),
            (last_index(matches, enable), true),
            (last_index(matches, disable), false),
        ];
        let winner = candidates
            .iter()
            .filter_map(|(index, on)| index.map(|i| (i, *on)))
            .max_by_key(|(i, _)| *i);
        if let Some((_, on)) = winner {
            set(&mut toggles, on);
        }
    }

    toggles
}

/// Log filter used when `RUST_LOG` is unset. The FUSE libraries log every
/// request at debug level, so they only get it from `-dd` on.
fn default_filter(debug: u8) -> &'static str {
    match debug {
        0 => "warn",
        1 => "warn,rsandbox=debug",
        _ => "trace",
    }
}

fn init_logging(debug: u8) {
    let env = env_logger::Env::default().default_filter_or(default_filter(debug));
    env_logger::Builder::from_env(env).init();
}

fn exit_code_of(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<SandboxError>()
        .map(SandboxError::exit_code)
        .unwrap_or(FAILURE_EXIT_CODE)
}

/// Parse the command line, run the sandbox and return the process exit code.
pub fn run() -> i32 {
    let matches = Cli::command().get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    init_logging(cli.debug);

    match execute(&cli, &matches) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("rsandbox: {:#}", e);
            exit_code_of(&e)
        }
    }
}

fn execute(cli: &Cli, matches: &ArgMatches) -> Result<i32> {
    let profile = match &cli.profile {
        Some(path) => SandboxProfile::load_from_file(path)?,
        None => SandboxProfile::default(),
    };

    let toggles = resolve_toggles(matches, profile.apply_toggles(IsolationToggles::all()));

    let allow: Vec<&str> = profile
        .fs_allow
        .iter()
        .chain(cli.fs_allow.iter())
        .map(String::as_str)
        .collect();
    let writable_roots = resolve_writable_paths(&allow)?;

    let proxy = ProxyOptions {
        close_policy: if cli.strict_close || profile.strict_close {
            ClosePolicy::Strict
        } else {
            ClosePolicy::Suppress
        },
        trace_requests: cli.debug > 1,
    };

    // Held until the run is over so the directory goes away on every path.
    let guard = if toggles.filesystem && toggles.mount {
        Some(MountPointGuard::create()?)
    } else {
        None
    };
    let mount_point = guard
        .as_ref()
        .map(|guard| guard.path().to_path_buf())
        .unwrap_or_default();

    let config = SandboxConfig::build(
        toggles,
        cli.command.clone(),
        mount_point,
        writable_roots,
        proxy,
    )?;

    let code = supervisor::run(&config).context("sandbox failed")?;
    drop(guard);
    Ok(code)
}
