/// Access decisions for paths seen by the filesystem proxy
use nix::errno::Errno;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// A request path broken into the parts the proxy compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathClassification<'a> {
    pub path: &'a Path,
    /// Parent directory; `/` for `/` itself
    pub dirname: &'a Path,
    /// Final component; empty for `/`
    pub basename: &'a OsStr,
    /// Length in bytes of the full path
    pub len: usize,
}

impl<'a> PathClassification<'a> {
    pub fn new(path: &'a Path) -> Self {
        Self {
            path,
            dirname: path.parent().unwrap_or(path),
            basename: path.file_name().unwrap_or_default(),
            len: path.as_os_str().len(),
        }
    }
}

/// One entry of the write allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritableRoot {
    root: PathBuf,
}

impl WritableRoot {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// True only for paths strictly below the root; the root itself is not
    /// covered.
    pub fn covers(&self, candidate: &PathClassification<'_>) -> bool {
        candidate.path.starts_with(&self.root) && candidate.path != self.root.as_path()
    }
}

/// Static classification of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessClass {
    Hidden,
    ReadOnly,
    ReadWrite,
}

/// What an operation intends to do with a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Write,
}

/// Outcome of checking one path for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// The path does not exist as far as the caller can tell
    Hidden,
    Permitted,
    /// Mutation outside every writable root
    Denied,
}

impl AccessDecision {
    pub fn errno(self) -> Option<Errno> {
        match self {
            AccessDecision::Hidden => Some(Errno::ENOENT),
            AccessDecision::Permitted => None,
            AccessDecision::Denied => Some(Errno::EACCES),
        }
    }

    pub fn into_result(self) -> Result<(), Errno> {
        match self.errno() {
            Some(errno) => Err(errno),
            None => Ok(()),
        }
    }
}

/// Hidden subtree plus write allow-list.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    hidden_root: PathBuf,
    writable_roots: Vec<WritableRoot>,
}

impl AccessPolicy {
    pub fn new<P: Into<PathBuf>>(hidden_root: P, writable_roots: &[PathBuf]) -> Self {
        Self {
            hidden_root: hidden_root.into(),
            writable_roots: writable_roots.iter().cloned().map(WritableRoot::new).collect(),
        }
    }

    pub fn hidden_root(&self) -> &Path {
        &self.hidden_root
    }

    pub fn writable_roots(&self) -> &[WritableRoot] {
        &self.writable_roots
    }

    pub fn is_hidden(&self, path: &Path) -> bool {
        path.starts_with(&self.hidden_root)
    }

    pub fn classify(&self, path: &Path) -> AccessClass {
        if self.is_hidden(path) {
            return AccessClass::Hidden;
        }
        let candidate = PathClassification::new(path);
        if self.writable_roots.iter().any(|root| root.covers(&candidate)) {
            AccessClass::ReadWrite
        } else {
            AccessClass::ReadOnly
        }
    }

    /// Hidden wins over everything; writes need a ReadWrite path.
    pub fn decide(&self, path: &Path, intent: Intent) -> AccessDecision {
        match (self.classify(path), intent) {
            (AccessClass::Hidden, _) => AccessDecision::Hidden,
            (AccessClass::ReadWrite, _) | (AccessClass::ReadOnly, Intent::Read) => {
                AccessDecision::Permitted
            }
            (AccessClass::ReadOnly, Intent::Write) => AccessDecision::Denied,
        }
    }

    pub fn check(&self, path: &Path, intent: Intent) -> Result<(), Errno> {
        self.decide(path, intent).into_result()
    }

    /// Whether `name` must be left out of the listing of directory `dir`:
    /// only the mount point's own entry in its parent is suppressed.
    pub fn suppresses_entry(&self, dir: &Path, name: &OsStr) -> bool {
        let mount_point = PathClassification::new(&self.hidden_root);
        dir == mount_point.dirname && name == mount_point.basename
    }
}
