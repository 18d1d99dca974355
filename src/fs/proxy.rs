/// Pass-through FUSE filesystem enforcing the access policy
///
/// Paths handed in by the kernel are relative to the mount's root, which
/// mirrors `/`, so they are used directly as real paths. Every operation is
/// checked against the [`AccessPolicy`] before the native call is made.
use crate::config::types::{ClosePolicy, SandboxConfig};
use crate::fs::access::{AccessPolicy, Intent};
use crate::fs::readiness::ReadinessSender;
use crate::fs::xattr;
use fuse_mt::{
    CallbackResult, DirectoryEntry, FileAttr, FileType, FilesystemMT, RequestInfo, ResultData,
    ResultEmpty, ResultEntry, ResultOpen, ResultReaddir, ResultSlice, ResultStatfs, ResultWrite,
    ResultXattr, Statfs, Xattr,
};
use log::{debug, error, trace, warn};
use nix::dir::{Dir, Type};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::{utimensat, Mode, SFlag, UtimensatFlags};
use nix::sys::time::TimeSpec;
use nix::unistd::AccessFlags;
use std::ffi::{OsStr, OsString};
use std::fs::{DirBuilder, File, OpenOptions, Permissions};
use std::os::fd::IntoRawFd;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::{DirBuilderExt, FileExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How long the kernel may cache attributes and entries.
pub const ATTR_TTL: Duration = Duration::from_secs(1);

/// `FOPEN_DIRECT_IO` from linux/fuse.h: bypass the page cache for this handle.
pub const FOPEN_DIRECT_IO: u32 = 1 << 0;

type OpResult<T> = std::result::Result<T, Errno>;

fn io_errno(err: std::io::Error) -> Errno {
    Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO))
}

/// Errno as the positive code fuse_mt expects; it negates it on the wire.
fn wire(errno: Errno) -> libc::c_int {
    errno as libc::c_int
}

fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nsecs.clamp(0, 999_999_999) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}

fn timespec(time: Option<SystemTime>) -> TimeSpec {
    let Some(time) = time else {
        return TimeSpec::UTIME_OMIT;
    };
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => TimeSpec::from(since),
        Err(e) => {
            let before = e.duration();
            let mut secs = -(before.as_secs() as i64);
            let mut nanos = i64::from(before.subsec_nanos());
            if nanos > 0 {
                secs -= 1;
                nanos = 1_000_000_000 - nanos;
            }
            TimeSpec::new(secs as libc::time_t, nanos as _)
        }
    }
}

fn file_kind(mode: u32) -> FileType {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => FileType::Directory,
        libc::S_IFLNK => FileType::Symlink,
        libc::S_IFCHR => FileType::CharDevice,
        libc::S_IFBLK => FileType::BlockDevice,
        libc::S_IFIFO => FileType::NamedPipe,
        libc::S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn dir_entry_kind(kind: Type) -> FileType {
    match kind {
        Type::Directory => FileType::Directory,
        Type::Symlink => FileType::Symlink,
        Type::CharacterDevice => FileType::CharDevice,
        Type::BlockDevice => FileType::BlockDevice,
        Type::Fifo => FileType::NamedPipe,
        Type::Socket => FileType::Socket,
        Type::File => FileType::RegularFile,
    }
}

fn file_attr(meta: &std::fs::Metadata) -> FileAttr {
    FileAttr {
        size: meta.size(),
        blocks: meta.blocks(),
        atime: system_time(meta.atime(), meta.atime_nsec()),
        mtime: system_time(meta.mtime(), meta.mtime_nsec()),
        ctime: system_time(meta.ctime(), meta.ctime_nsec()),
        crtime: UNIX_EPOCH,
        kind: file_kind(meta.mode()),
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        flags: 0,
    }
}

fn lstat(path: &Path) -> OpResult<FileAttr> {
    std::fs::symlink_metadata(path)
        .map(|meta| file_attr(&meta))
        .map_err(io_errno)
}

/// Whether an open request can modify the file.
pub fn open_intent(flags: u32) -> Intent {
    let flags = flags as libc::c_int;
    let access = flags & libc::O_ACCMODE;
    if access == libc::O_WRONLY || access == libc::O_RDWR || flags & libc::O_TRUNC != 0 {
        Intent::Write
    } else {
        Intent::Read
    }
}

/// The proxy filesystem. One instance serves one mount.
pub struct SandboxFs {
    policy: AccessPolicy,
    readiness: Mutex<Option<ReadinessSender>>,
    close_policy: ClosePolicy,
    trace_requests: bool,
}

impl SandboxFs {
    pub fn new(config: &SandboxConfig, readiness: Option<ReadinessSender>) -> Self {
        Self::with_policy(
            AccessPolicy::new(&config.mount_point, &config.writable_roots),
            readiness,
            config.proxy.close_policy,
            config.proxy.trace_requests,
        )
    }

    pub fn with_policy(
        policy: AccessPolicy,
        readiness: Option<ReadinessSender>,
        close_policy: ClosePolicy,
        trace_requests: bool,
    ) -> Self {
        for root in policy.writable_roots() {
            debug!("fs: path {} is writable", root.path().display());
        }
        Self {
            policy,
            readiness: Mutex::new(readiness),
            close_policy,
            trace_requests,
        }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    fn trace(&self, op: &str, path: &Path) {
        if self.trace_requests {
            trace!("fuse {} {}", op, path.display());
        }
    }

    /// Write the readiness word if it has not been written yet.
    /// Returns whether this call sent it.
    pub fn notify_ready(&self) -> std::io::Result<bool> {
        let sender = match self.readiness.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(sender) => {
                sender.signal_ready()?;
                debug!("fuse init: notified parent");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn attributes(&self, path: &Path) -> OpResult<FileAttr> {
        self.policy.check(path, Intent::Read)?;
        lstat(path)
    }

    pub fn read_link(&self, path: &Path) -> OpResult<Vec<u8>> {
        self.policy.check(path, Intent::Read)?;
        std::fs::read_link(path)
            .map(|target| target.into_os_string().into_vec())
            .map_err(io_errno)
    }

    pub fn make_node(&self, path: &Path, mode: u32, rdev: u32) -> OpResult<FileAttr> {
        self.policy.check(path, Intent::Write)?;
        nix::sys::stat::mknod(
            path,
            SFlag::from_bits_truncate(mode & libc::S_IFMT),
            Mode::from_bits_truncate(mode & !libc::S_IFMT),
            libc::dev_t::from(rdev),
        )?;
        lstat(path)
    }

    pub fn make_dir(&self, path: &Path, mode: u32) -> OpResult<FileAttr> {
        self.policy.check(path, Intent::Write)?;
        DirBuilder::new().mode(mode).create(path).map_err(io_errno)?;
        lstat(path)
    }

    pub fn remove_file(&self, path: &Path) -> OpResult<()> {
        self.policy.check(path, Intent::Write)?;
        std::fs::remove_file(path).map_err(io_errno)
    }

    pub fn remove_dir(&self, path: &Path) -> OpResult<()> {
        self.policy.check(path, Intent::Write)?;
        std::fs::remove_dir(path).map_err(io_errno)
    }

    /// Only the new link is checked; the target may point anywhere.
    pub fn make_symlink(&self, link: &Path, target: &Path) -> OpResult<FileAttr> {
        self.policy.check(link, Intent::Write)?;
        std::os::unix::fs::symlink(target, link).map_err(io_errno)?;
        lstat(link)
    }

    pub fn rename(&self, from: &Path, to: &Path) -> OpResult<()> {
        self.policy.check(from, Intent::Write)?;
        self.policy.check(to, Intent::Write)?;
        std::fs::rename(from, to).map_err(io_errno)
    }

    /// Only the new name is checked.
    pub fn make_hard_link(&self, existing: &Path, link: &Path) -> OpResult<FileAttr> {
        self.policy.check(link, Intent::Write)?;
        std::fs::hard_link(existing, link).map_err(io_errno)?;
        lstat(link)
    }

    pub fn set_mode(&self, path: &Path, mode: u32) -> OpResult<()> {
        self.policy.check(path, Intent::Write)?;
        std::fs::set_permissions(path, Permissions::from_mode(mode)).map_err(io_errno)
    }

    pub fn set_owner(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> OpResult<()> {
        self.policy.check(path, Intent::Write)?;
        std::os::unix::fs::chown(path, uid, gid).map_err(io_errno)
    }

    pub fn truncate(&self, path: &Path, size: u64) -> OpResult<()> {
        self.policy.check(path, Intent::Write)?;
        let size = libc::off_t::try_from(size).map_err(|_| Errno::EFBIG)?;
        nix::unistd::truncate(path, size)
    }

    /// Timestamps that are `None` are left as they are. Works on the entry
    /// itself, so directories and symlinks are covered too.
    pub fn set_times(
        &self,
        path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> OpResult<()> {
        self.policy.check(path, Intent::Write)?;
        utimensat(
            None,
            path,
            &timespec(atime),
            &timespec(mtime),
            UtimensatFlags::NoFollowSymlink,
        )
    }

    /// Validate an open by opening and closing the real file. Returns the
    /// open flags for the kernel.
    pub fn open(&self, path: &Path, flags: u32) -> OpResult<u32> {
        self.policy.check(path, open_intent(flags))?;
        let fd = nix::fcntl::open(
            path,
            OFlag::from_bits_truncate(flags as libc::c_int) | OFlag::O_CLOEXEC,
            Mode::empty(),
        )?;
        nix::unistd::close(fd)?;
        Ok(FOPEN_DIRECT_IO)
    }

    /// Positioned read from a fresh read-only descriptor.
    pub fn read(&self, path: &Path, offset: u64, size: u32) -> OpResult<Vec<u8>> {
        self.policy.check(path, Intent::Read)?;
        let file = File::open(path).map_err(io_errno)?;
        let mut buf = vec![0u8; size as usize];
        let n = file.read_at(&mut buf, offset).map_err(io_errno)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Positioned write through a fresh write-only descriptor.
    pub fn write(&self, path: &Path, offset: u64, data: &[u8]) -> OpResult<u32> {
        self.policy.check(path, Intent::Write)?;
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(io_errno)?;

        let written = file.write_at(data, offset);
        let closed = nix::unistd::close(file.into_raw_fd());
        let written = written.map_err(io_errno)?;

        if let Err(errno) = closed {
            match self.close_policy {
                ClosePolicy::Suppress => {
                    warn!(
                        "close after writing {} bytes to {} failed: {}",
                        written,
                        path.display(),
                        errno
                    );
                }
                ClosePolicy::Strict => return Err(errno),
            }
        }

        Ok(written as u32)
    }

    pub fn open_dir(&self, path: &Path) -> OpResult<()> {
        self.policy.check(path, Intent::Read)?;
        Dir::open(path, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty()).map(drop)
    }

    /// Entries in native order, minus the mount point's own entry when
    /// listing its parent.
    pub fn list_dir(&self, path: &Path) -> OpResult<Vec<DirectoryEntry>> {
        self.policy.check(path, Intent::Read)?;
        let mut dir = Dir::open(path, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty())?;

        let mut entries = Vec::new();
        for entry in dir.iter() {
            let entry = entry?;
            let name = OsStr::from_bytes(entry.file_name().to_bytes());
            if self.policy.suppresses_entry(path, name) {
                continue;
            }
            let kind = match entry.file_type() {
                Some(kind) => dir_entry_kind(kind),
                None => lstat(&path.join(name))
                    .map(|attr| attr.kind)
                    .unwrap_or(FileType::RegularFile),
            };
            entries.push(DirectoryEntry {
                name: OsString::from(name),
                kind,
            });
        }
        Ok(entries)
    }

    pub fn fs_stats(&self, path: &Path) -> OpResult<Statfs> {
        self.policy.check(path, Intent::Read)?;
        let stats = nix::sys::statvfs::statvfs(path)?;
        Ok(Statfs {
            blocks: stats.blocks(),
            bfree: stats.blocks_free(),
            bavail: stats.blocks_available(),
            files: stats.files(),
            ffree: stats.files_free(),
            bsize: stats.block_size() as u32,
            namelen: stats.name_max() as u32,
            frsize: stats.fragment_size() as u32,
        })
    }

    pub fn set_xattr(&self, path: &Path, name: &OsStr, value: &[u8], flags: u32) -> OpResult<()> {
        self.policy.check(path, Intent::Write)?;
        xattr::set(path, name, value, flags as libc::c_int)
    }

    pub fn get_xattr(&self, path: &Path, name: &OsStr, size: u32) -> OpResult<Xattr> {
        self.policy.check(path, Intent::Read)?;
        if size == 0 {
            let needed = xattr::get(path, name, &mut [])?;
            return Ok(Xattr::Size(needed as u32));
        }
        let mut buf = vec![0u8; size as usize];
        let n = xattr::get(path, name, &mut buf)?;
        buf.truncate(n);
        Ok(Xattr::Data(buf))
    }

    pub fn list_xattr(&self, path: &Path, size: u32) -> OpResult<Xattr> {
        self.policy.check(path, Intent::Read)?;
        if size == 0 {
            let needed = xattr::list(path, &mut [])?;
            return Ok(Xattr::Size(needed as u32));
        }
        let mut buf = vec![0u8; size as usize];
        let n = xattr::list(path, &mut buf)?;
        buf.truncate(n);
        Ok(Xattr::Data(buf))
    }

    pub fn remove_xattr(&self, path: &Path, name: &OsStr) -> OpResult<()> {
        self.policy.check(path, Intent::Write)?;
        xattr::remove(path, name)
    }

    /// A `W_OK` probe is answered with the write allow-list as well.
    pub fn check_access(&self, path: &Path, mask: u32) -> OpResult<()> {
        let flags = AccessFlags::from_bits_truncate(mask as libc::c_int);
        let intent = if flags.contains(AccessFlags::W_OK) {
            Intent::Write
        } else {
            Intent::Read
        };
        self.policy.check(path, intent)?;
        nix::unistd::access(path, flags)
    }
}

fn entry(attr: OpResult<FileAttr>) -> ResultEntry {
    attr.map(|attr| (ATTR_TTL, attr)).map_err(wire)
}

fn child(parent: &Path, name: &OsStr) -> PathBuf {
    parent.join(name)
}

impl FilesystemMT for SandboxFs {
    fn init(&self, _req: RequestInfo) -> ResultEmpty {
        self.notify_ready().map(drop).map_err(|e| {
            error!("fuse init: could not notify parent: {}", e);
            e.raw_os_error().unwrap_or(libc::EIO)
        })
    }

    fn getattr(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>) -> ResultEntry {
        self.trace("getattr", path);
        entry(self.attributes(path))
    }

    fn chmod(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>, mode: u32) -> ResultEmpty {
        self.trace("chmod", path);
        self.set_mode(path, mode).map_err(wire)
    }

    fn chown(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: Option<u64>,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> ResultEmpty {
        self.trace("chown", path);
        self.set_owner(path, uid, gid).map_err(wire)
    }

    fn truncate(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>, size: u64) -> ResultEmpty {
        self.trace("truncate", path);
        SandboxFs::truncate(self, path, size).map_err(wire)
    }

    fn utimens(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: Option<u64>,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> ResultEmpty {
        self.trace("utimens", path);
        self.set_times(path, atime, mtime).map_err(wire)
    }

    fn readlink(&self, _req: RequestInfo, path: &Path) -> ResultData {
        self.trace("readlink", path);
        self.read_link(path).map_err(wire)
    }

    fn mknod(
        &self,
        _req: RequestInfo,
        parent: &Path,
        name: &OsStr,
        mode: u32,
        rdev: u32,
    ) -> ResultEntry {
        let path = child(parent, name);
        self.trace("mknod", &path);
        entry(self.make_node(&path, mode, rdev))
    }

    fn mkdir(&self, _req: RequestInfo, parent: &Path, name: &OsStr, mode: u32) -> ResultEntry {
        let path = child(parent, name);
        self.trace("mkdir", &path);
        entry(self.make_dir(&path, mode))
    }

    fn unlink(&self, _req: RequestInfo, parent: &Path, name: &OsStr) -> ResultEmpty {
        let path = child(parent, name);
        self.trace("unlink", &path);
        self.remove_file(&path).map_err(wire)
    }

    fn rmdir(&self, _req: RequestInfo, parent: &Path, name: &OsStr) -> ResultEmpty {
        let path = child(parent, name);
        self.trace("rmdir", &path);
        self.remove_dir(&path).map_err(wire)
    }

    fn symlink(
        &self,
        _req: RequestInfo,
        parent: &Path,
        name: &OsStr,
        target: &Path,
    ) -> ResultEntry {
        let path = child(parent, name);
        self.trace("symlink", &path);
        entry(self.make_symlink(&path, target))
    }

    fn rename(
        &self,
        _req: RequestInfo,
        parent: &Path,
        name: &OsStr,
        newparent: &Path,
        newname: &OsStr,
    ) -> ResultEmpty {
        let from = child(parent, name);
        let to = child(newparent, newname);
        self.trace("rename", &from);
        SandboxFs::rename(self, &from, &to).map_err(wire)
    }

    fn link(
        &self,
        _req: RequestInfo,
        path: &Path,
        newparent: &Path,
        newname: &OsStr,
    ) -> ResultEntry {
        let link = child(newparent, newname);
        self.trace("link", &link);
        entry(self.make_hard_link(path, &link))
    }

    fn open(&self, _req: RequestInfo, path: &Path, flags: u32) -> ResultOpen {
        self.trace("open", path);
        SandboxFs::open(self, path, flags)
            .map(|open_flags| (0, open_flags))
            .map_err(wire)
    }

    fn read(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: u64,
        offset: u64,
        size: u32,
        callback: impl FnOnce(ResultSlice<'_>) -> CallbackResult,
    ) -> CallbackResult {
        self.trace("read", path);
        match SandboxFs::read(self, path, offset, size) {
            Ok(data) => callback(Ok(data.as_slice())),
            Err(errno) => callback(Err(wire(errno))),
        }
    }

    fn write(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: u64,
        offset: u64,
        data: Vec<u8>,
        _flags: u32,
    ) -> ResultWrite {
        self.trace("write", path);
        SandboxFs::write(self, path, offset, &data).map_err(wire)
    }

    fn opendir(&self, _req: RequestInfo, path: &Path, _flags: u32) -> ResultOpen {
        self.trace("opendir", path);
        self.open_dir(path).map(|()| (0, 0)).map_err(wire)
    }

    fn readdir(&self, _req: RequestInfo, path: &Path, _fh: u64) -> ResultReaddir {
        self.trace("readdir", path);
        self.list_dir(path).map_err(wire)
    }

    fn statfs(&self, _req: RequestInfo, path: &Path) -> ResultStatfs {
        self.trace("statfs", path);
        self.fs_stats(path).map_err(wire)
    }

    fn setxattr(
        &self,
        _req: RequestInfo,
        path: &Path,
        name: &OsStr,
        value: &[u8],
        flags: u32,
        _position: u32,
    ) -> ResultEmpty {
        self.trace("setxattr", path);
        self.set_xattr(path, name, value, flags).map_err(wire)
    }

    fn getxattr(&self, _req: RequestInfo, path: &Path, name: &OsStr, size: u32) -> ResultXattr {
        self.trace("getxattr", path);
        self.get_xattr(path, name, size).map_err(wire)
    }

    fn listxattr(&self, _req: RequestInfo, path: &Path, size: u32) -> ResultXattr {
        self.trace("listxattr", path);
        self.list_xattr(path, size).map_err(wire)
    }

    fn removexattr(&self, _req: RequestInfo, path: &Path, name: &OsStr) -> ResultEmpty {
        self.trace("removexattr", path);
        self.remove_xattr(path, name).map_err(wire)
    }

    fn access(&self, _req: RequestInfo, path: &Path, mask: u32) -> ResultEmpty {
        self.trace("access", path);
        self.check_access(path, mask).map_err(wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::readiness;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        fs: SandboxFs,
    }

    impl Fixture {
        fn new(close_policy: ClosePolicy) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().canonicalize().unwrap();
            for sub in ["mnt", "work", "ro"] {
                std::fs::create_dir(root.join(sub)).unwrap();
            }
            std::fs::write(root.join("ro/config"), b"original").unwrap();

            let policy = AccessPolicy::new(root.join("mnt"), &[root.join("work")]);
            let fs = SandboxFs::with_policy(policy, None, close_policy, false);
            Self {
                _dir: dir,
                root,
                fs,
            }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.root.join(rel)
        }
    }

    #[test]
    fn write_under_writable_root_then_read_back() {
        let fx = Fixture::new(ClosePolicy::Suppress);
        let out = fx.path("work/out.txt");
        fx.fs.make_node(&out, libc::S_IFREG | 0o644, 0).unwrap();

        assert_eq!(fx.fs.write(&out, 0, b"hello world").unwrap(), 11);
        assert_eq!(fx.fs.write(&out, 6, b"rusty").unwrap(), 5);
        assert_eq!(std::fs::read(&out).unwrap(), b"hello rusty");
        assert_eq!(fx.fs.read(&out, 6, 100).unwrap(), b"rusty");
    }

    #[test]
    fn write_outside_roots_is_denied() {
        let fx = Fixture::new(ClosePolicy::Strict);
        let config = fx.path("ro/config");

        assert_eq!(fx.fs.write(&config, 0, b"x"), Err(Errno::EACCES));
        assert_eq!(fx.fs.truncate(&config, 0), Err(Errno::EACCES));
        assert_eq!(fx.fs.set_mode(&config, 0o600), Err(Errno::EACCES));
        assert_eq!(fx.fs.remove_file(&config), Err(Errno::EACCES));
        assert_eq!(std::fs::read(&config).unwrap(), b"original");

        assert_eq!(fx.fs.read(&config, 0, 64).unwrap(), b"original");
        assert_eq!(fx.fs.attributes(&config).unwrap().size, 8);
    }

    #[test]
    fn writable_root_itself_cannot_be_removed() {
        let fx = Fixture::new(ClosePolicy::Suppress);
        assert_eq!(fx.fs.remove_dir(&fx.path("work")), Err(Errno::EACCES));
        assert!(fx.path("work").is_dir());
    }

    #[test]
    fn mount_point_is_not_found() {
        let fx = Fixture::new(ClosePolicy::Suppress);
        let inside = fx.path("mnt/anything");

        assert_eq!(fx.fs.attributes(&fx.path("mnt")).err(), Some(Errno::ENOENT));
        assert_eq!(fx.fs.read(&inside, 0, 1), Err(Errno::ENOENT));
        assert_eq!(fx.fs.write(&inside, 0, b"x"), Err(Errno::ENOENT));
        assert_eq!(fx.fs.list_dir(&fx.path("mnt")).err(), Some(Errno::ENOENT));
    }

    #[test]
    fn listing_parent_omits_mount_point() {
        let fx = Fixture::new(ClosePolicy::Suppress);
        let names: Vec<OsString> = fx
            .fs
            .list_dir(&fx.root)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();

        assert!(!names.contains(&OsString::from("mnt")));
        for expected in [".", "..", "work", "ro"] {
            assert!(names.contains(&OsString::from(expected)), "{expected} missing");
        }
    }

    #[test]
    fn listing_reports_entry_kinds() {
        let fx = Fixture::new(ClosePolicy::Suppress);
        let entries = fx.fs.list_dir(&fx.path("ro")).unwrap();
        let config = entries
            .iter()
            .find(|e| e.name == OsString::from("config"))
            .unwrap();
        assert_eq!(config.kind, FileType::RegularFile);
    }

    #[test]
    fn rename_checks_both_paths() {
        let fx = Fixture::new(ClosePolicy::Suppress);
        let scratch = fx.path("work/scratch");
        std::fs::write(&scratch, b"data").unwrap();

        assert_eq!(
            fx.fs.rename(&scratch, &fx.path("ro/stolen")),
            Err(Errno::EACCES)
        );
        assert_eq!(
            fx.fs.rename(&fx.path("ro/config"), &fx.path("work/config")),
            Err(Errno::EACCES)
        );
        fx.fs.rename(&scratch, &fx.path("work/renamed")).unwrap();
        assert!(fx.path("work/renamed").exists());
    }

    #[test]
    fn links_check_only_the_new_name() {
        let fx = Fixture::new(ClosePolicy::Suppress);
        let target = fx.path("ro/config");

        let attr = fx.fs.make_symlink(&fx.path("work/cfg"), &target).unwrap();
        assert_eq!(attr.kind, FileType::Symlink);
        assert_eq!(
            fx.fs.read_link(&fx.path("work/cfg")).unwrap(),
            target.as_os_str().as_bytes()
        );

        assert_eq!(
            fx.fs.make_symlink(&fx.path("ro/cfg"), &target).err(),
            Some(Errno::EACCES)
        );
        assert_eq!(
            fx.fs
                .make_hard_link(&fx.path("work/cfg"), &fx.path("ro/second"))
                .err(),
            Some(Errno::EACCES)
        );
    }

    #[test]
    fn mkdir_and_rmdir_in_writable_root() {
        let fx = Fixture::new(ClosePolicy::Suppress);
        let sub = fx.path("work/sub");
        let attr = fx.fs.make_dir(&sub, 0o755).unwrap();
        assert_eq!(attr.kind, FileType::Directory);
        fx.fs.remove_dir(&sub).unwrap();
        assert!(!sub.exists());

        assert_eq!(fx.fs.make_dir(&fx.path("ro/sub"), 0o755).err(), Some(Errno::EACCES));
    }

    #[test]
    fn open_intent_follows_flags() {
        assert_eq!(open_intent(libc::O_RDONLY as u32), Intent::Read);
        assert_eq!(open_intent(libc::O_WRONLY as u32), Intent::Write);
        assert_eq!(open_intent(libc::O_RDWR as u32), Intent::Write);
        assert_eq!(open_intent((libc::O_RDONLY | libc::O_TRUNC) as u32), Intent::Write);
    }

    #[test]
    fn open_requests_direct_io() {
        let fx = Fixture::new(ClosePolicy::Suppress);
        let config = fx.path("ro/config");
        assert_eq!(fx.fs.open(&config, libc::O_RDONLY as u32), Ok(FOPEN_DIRECT_IO));
        assert_eq!(fx.fs.open(&config, libc::O_WRONLY as u32), Err(Errno::EACCES));
        assert_eq!(
            fx.fs.open(&fx.path("ro/missing"), libc::O_RDONLY as u32),
            Err(Errno::ENOENT)
        );
    }

    #[test]
    fn timestamps_set_on_file() {
        let fx = Fixture::new(ClosePolicy::Suppress);
        let file = fx.path("work/stamped");
        std::fs::write(&file, b"").unwrap();
        let atime = std::fs::metadata(&file).unwrap().accessed().unwrap();

        let mtime = UNIX_EPOCH + Duration::from_secs(1_000_000);
        fx.fs.set_times(&file, None, Some(mtime)).unwrap();
        let meta = std::fs::metadata(&file).unwrap();
        assert_eq!(meta.modified().unwrap(), mtime);
        assert_eq!(meta.accessed().unwrap(), atime);
    }

    #[test]
    fn timestamps_set_on_directory() {
        let fx = Fixture::new(ClosePolicy::Suppress);
        let dir = fx.path("work/stamped-dir");
        std::fs::create_dir(&dir).unwrap();

        let when = UNIX_EPOCH + Duration::from_secs(2_000_000);
        fx.fs.set_times(&dir, Some(when), Some(when)).unwrap();
        assert_eq!(std::fs::metadata(&dir).unwrap().modified().unwrap(), when);
        assert_eq!(
            fx.fs.set_times(&fx.path("ro"), None, Some(when)),
            Err(Errno::EACCES)
        );
    }

    #[test]
    fn timespec_before_epoch() {
        let t = timespec(Some(UNIX_EPOCH - Duration::from_millis(1500)));
        assert_eq!((t.tv_sec(), t.tv_nsec()), (-2, 500_000_000));
    }

    #[test]
    fn access_with_write_mask_uses_allow_list() {
        let fx = Fixture::new(ClosePolicy::Suppress);
        let mask = libc::W_OK as u32;
        assert_eq!(fx.fs.check_access(&fx.path("ro/config"), mask), Err(Errno::EACCES));
        assert_eq!(fx.fs.check_access(&fx.path("ro/config"), libc::F_OK as u32), Ok(()));
    }

    #[test]
    fn statfs_on_visible_path() {
        let fx = Fixture::new(ClosePolicy::Suppress);
        let stats = fx.fs.fs_stats(&fx.root).unwrap();
        assert!(stats.bsize > 0);
        assert_eq!(fx.fs.fs_stats(&fx.path("mnt")).err(), Some(Errno::ENOENT));
    }

    #[test]
    fn readiness_sent_exactly_once() {
        let (tx, rx) = readiness::channel().unwrap();
        let policy = AccessPolicy::new("/nonexistent/mnt", &[]);
        let fs = SandboxFs::with_policy(policy, Some(tx), ClosePolicy::Suppress, false);

        assert!(fs.notify_ready().unwrap());
        assert!(!fs.notify_ready().unwrap());
        assert!(rx.wait().is_ok());
    }

    #[test]
    fn negative_timestamps_before_epoch() {
        assert_eq!(system_time(-1, 0), UNIX_EPOCH - Duration::from_secs(1));
        assert_eq!(
            system_time(2, 500),
            UNIX_EPOCH + Duration::from_secs(2) + Duration::from_nanos(500)
        );
    }
}
