/// Namespace selection, ordering and kernel support probing
use crate::config::types::{Result, SandboxConfig, SandboxError};

use nix::errno::Errno;
use nix::sched::{clone, CloneFlags};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

/// Stack handed to clone() for namespace-creating children.
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Stack for throwaway probe children; they return immediately.
const PROBE_STACK_SIZE: usize = 64 * 1024;

/// Kernel isolation domains this sandbox can create.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    Network,
    Pid,
    Mount,
    Ipc,
}

impl NamespaceKind {
    pub const ALL: [NamespaceKind; 4] = [
        NamespaceKind::Network,
        NamespaceKind::Pid,
        NamespaceKind::Mount,
        NamespaceKind::Ipc,
    ];

    pub fn clone_flag(self) -> CloneFlags {
        match self {
            NamespaceKind::Network => CloneFlags::CLONE_NEWNET,
            NamespaceKind::Pid => CloneFlags::CLONE_NEWPID,
            NamespaceKind::Mount => CloneFlags::CLONE_NEWNS,
            NamespaceKind::Ipc => CloneFlags::CLONE_NEWIPC,
        }
    }

    pub fn flag_name(self) -> &'static str {
        match self {
            NamespaceKind::Network => "CLONE_NEWNET",
            NamespaceKind::Pid => "CLONE_NEWPID",
            NamespaceKind::Mount => "CLONE_NEWNS",
            NamespaceKind::Ipc => "CLONE_NEWIPC",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NamespaceKind::Network => "network",
            NamespaceKind::Pid => "process",
            NamespaceKind::Mount => "mount",
            NamespaceKind::Ipc => "IPC",
        }
    }

    /// Kernel configuration the namespace depends on, when there is one to name.
    pub fn kernel_feature(self) -> Option<&'static str> {
        match self {
            NamespaceKind::Network => Some("CONFIG_NET_NS"),
            NamespaceKind::Pid => Some("CONFIG_PID_NS"),
            NamespaceKind::Mount => None,
            NamespaceKind::Ipc => Some("CONFIG_SYSVIPC and CONFIG_IPC_NS"),
        }
    }

    /// Whether the sandbox stage creates this namespace again when the proxy
    /// stage already did. A nested PID namespace hides the proxy from the
    /// command; the mount namespace is shared so the proxy's mount is visible.
    fn renewed_for_sandbox(self) -> bool {
        match self {
            NamespaceKind::Pid => true,
            NamespaceKind::Mount => false,
            NamespaceKind::Network | NamespaceKind::Ipc => true,
        }
    }

    fn requested(self, config: &SandboxConfig) -> bool {
        match self {
            NamespaceKind::Network => config.toggles.network,
            NamespaceKind::Pid => config.toggles.process,
            NamespaceKind::Mount => config.toggles.mount,
            NamespaceKind::Ipc => config.toggles.ipc,
        }
    }

    fn bit(self) -> u8 {
        match self {
            NamespaceKind::Network => 1 << 0,
            NamespaceKind::Pid => 1 << 1,
            NamespaceKind::Mount => 1 << 2,
            NamespaceKind::Ipc => 1 << 3,
        }
    }
}

impl std::fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A set of namespace kinds, iterated in [`NamespaceKind::ALL`] order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NamespaceSet {
    bits: u8,
}

impl NamespaceSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of(kinds: &[NamespaceKind]) -> Self {
        let mut set = Self::empty();
        for kind in kinds {
            set.insert(*kind);
        }
        set
    }

    pub fn insert(&mut self, kind: NamespaceKind) {
        self.bits |= kind.bit();
    }

    pub fn contains(&self, kind: NamespaceKind) -> bool {
        self.bits & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = NamespaceKind> + '_ {
        NamespaceKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }

    pub fn clone_flags(&self) -> CloneFlags {
        self.iter()
            .fold(CloneFlags::empty(), |flags, kind| flags | kind.clone_flag())
    }

    /// Labels of the members, for diagnostics
    pub fn labels(&self) -> Vec<&'static str> {
        self.iter().map(NamespaceKind::label).collect()
    }
}

/// Points in the process tree where namespaces are created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Private mount+PID pair around the filesystem proxy (outer clone)
    ProxyIsolation,
    /// Namespaces of the sandboxed command's process
    Sandbox,
}

/// Creation order. A stage is always fully established before the next one,
/// and the proxy process only exists once `ProxyIsolation` is in place.
pub const STAGE_ORDER: [Stage; 2] = [Stage::ProxyIsolation, Stage::Sandbox];

/// Members of the proxy isolation stage, when it is used.
const PROXY_ISOLATION_KINDS: [NamespaceKind; 2] = [NamespaceKind::Mount, NamespaceKind::Pid];

/// Which namespaces are created at each stage for one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NamespacePlan {
    pub proxy_isolation: NamespaceSet,
    pub sandbox: NamespaceSet,
}

impl NamespacePlan {
    pub fn for_config(config: &SandboxConfig) -> Self {
        let proxy_isolation = if config.clone_for_proxy {
            NamespaceSet::of(&PROXY_ISOLATION_KINDS)
        } else {
            NamespaceSet::empty()
        };

        let mut sandbox = NamespaceSet::empty();
        for kind in NamespaceKind::ALL {
            if !kind.requested(config) {
                continue;
            }
            if proxy_isolation.contains(kind) && !kind.renewed_for_sandbox() {
                log::debug!("Not using {}; already cloned for FUSE", kind.flag_name());
                continue;
            }
            sandbox.insert(kind);
        }

        Self {
            proxy_isolation,
            sandbox,
        }
    }

    pub fn stage(&self, stage: Stage) -> NamespaceSet {
        match stage {
            Stage::ProxyIsolation => self.proxy_isolation,
            Stage::Sandbox => self.sandbox,
        }
    }

    /// Whether an outer clone is needed before anything else
    pub fn needs_outer_clone(&self) -> bool {
        !self.proxy_isolation.is_empty()
    }

    /// Members of one stage in creation order: mount before PID for the
    /// proxy pair, [`NamespaceKind::ALL`] order otherwise.
    fn stage_order(&self, stage: Stage) -> Vec<NamespaceKind> {
        let set = self.stage(stage);
        match stage {
            Stage::ProxyIsolation => PROXY_ISOLATION_KINDS
                .into_iter()
                .filter(|kind| set.contains(*kind))
                .collect(),
            Stage::Sandbox => set.iter().collect(),
        }
    }

    /// Kinds to probe, each once, in stage order.
    pub fn probe_order(&self) -> Vec<NamespaceKind> {
        let mut seen = NamespaceSet::empty();
        let mut order = Vec::new();
        for stage in STAGE_ORDER {
            for kind in self.stage_order(stage) {
                if !seen.contains(kind) {
                    seen.insert(kind);
                    order.push(kind);
                }
            }
        }
        order
    }
}

/// Attempts to create a single namespace kind and discard it immediately.
pub trait NamespaceProber {
    fn try_create(&self, kind: NamespaceKind) -> std::result::Result<(), Errno>;
}

/// Probes by cloning a child that exits at once.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloneProber;

impl NamespaceProber for CloneProber {
    fn try_create(&self, kind: NamespaceKind) -> std::result::Result<(), Errno> {
        let mut stack = vec![0u8; PROBE_STACK_SIZE];
        let child_cb: Box<dyn FnMut() -> isize> = Box::new(|| 0);

        // SAFETY: the child runs a closure that touches no shared state and
        // returns immediately; it has its own copy of the address space.
        let pid = unsafe { clone(child_cb, &mut stack, kind.clone_flag(), Some(libc::SIGCHLD)) }?;
        loop {
            match waitpid(pid, None) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Probe one namespace kind, classifying the failure.
pub fn probe<P: NamespaceProber + ?Sized>(prober: &P, kind: NamespaceKind) -> Result<()> {
    match prober.try_create(kind) {
        Ok(()) => Ok(()),
        Err(Errno::EPERM) => Err(SandboxError::MissingPrivilege {
            kind: kind.label().to_string(),
            flag: kind.flag_name().to_string(),
        }),
        Err(Errno::EINVAL) => Err(SandboxError::KernelUnsupported {
            kind: kind.label().to_string(),
            flag: kind.flag_name().to_string(),
            feature: kind.kernel_feature().map(str::to_string),
        }),
        Err(errno) => Err(SandboxError::NamespaceProbe {
            kind: kind.label().to_string(),
            flag: kind.flag_name().to_string(),
            errno,
        }),
    }
}

/// Probe every namespace the plan will create; stops at the first failure.
pub fn probe_plan<P: NamespaceProber + ?Sized>(prober: &P, plan: &NamespacePlan) -> Result<()> {
    for kind in plan.probe_order() {
        probe(prober, kind).map_err(|e| {
            log::error!("Could not initialize {} sandbox; aborting.", kind.label());
            e
        })?;
        log::debug!("Using {}", kind.flag_name());
    }
    Ok(())
}

/// Create a child process in the given namespaces running `child`.
/// The child's return value becomes its exit status.
pub fn spawn_in_namespaces<'a>(
    namespaces: NamespaceSet,
    child: Box<dyn FnMut() -> isize + 'a>,
) -> Result<Pid> {
    let mut stack = vec![0u8; CHILD_STACK_SIZE];

    // SAFETY: clone without CLONE_VM gives the child a private copy of the
    // address space; the closure only reads data that outlives this call.
    let pid = unsafe {
        clone(
            child,
            &mut stack,
            namespaces.clone_flags(),
            Some(libc::SIGCHLD),
        )
    }
    .map_err(|e| SandboxError::Process(format!("clone: {}", e)))?;

    Ok(pid)
}

/// Block until `pid` terminates and return how it ended.
pub fn wait_for_exit(pid: Pid) -> Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(status @ WaitStatus::Exited(..)) | Ok(status @ WaitStatus::Signaled(..)) => {
                log::debug!("process {} finished: {:?}", pid, status);
                return Ok(status);
            }
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(SandboxError::Process(format!("waitpid({}): {}", pid, e)));
            }
        }
    }
}
