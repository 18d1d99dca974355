//! Extended attributes on the link itself (`l*xattr`)

use nix::errno::Errno;
use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

fn c_string(bytes: &[u8]) -> Result<CString, Errno> {
    CString::new(bytes).map_err(|_| Errno::EINVAL)
}

fn c_path(path: &Path) -> Result<CString, Errno> {
    c_string(path.as_os_str().as_bytes())
}

fn c_name(name: &OsStr) -> Result<CString, Errno> {
    c_string(name.as_bytes())
}

fn byte_count(ret: libc::ssize_t) -> Result<usize, Errno> {
    Errno::result(ret).map(|n| n as usize)
}

pub fn set(path: &Path, name: &OsStr, value: &[u8], flags: i32) -> Result<(), Errno> {
    let path = c_path(path)?;
    let name = c_name(name)?;
    // SAFETY: both strings are NUL-terminated and `value` is valid for its length.
    let ret = unsafe {
        libc::lsetxattr(
            path.as_ptr(),
            name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            flags,
        )
    };
    Errno::result(ret).map(drop)
}

/// Read an attribute into `buf`. An empty `buf` asks only for the size.
pub fn get(path: &Path, name: &OsStr, buf: &mut [u8]) -> Result<usize, Errno> {
    let path = c_path(path)?;
    let name = c_name(name)?;
    // SAFETY: `buf` is writable for `buf.len()` bytes; a zero length is never written.
    let ret = unsafe {
        libc::lgetxattr(
            path.as_ptr(),
            name.as_ptr(),
            buf.as_mut_ptr().cast(),
            buf.len(),
        )
    };
    byte_count(ret)
}

/// List attribute names (NUL-separated) into `buf`. An empty `buf` asks only
/// for the size.
pub fn list(path: &Path, buf: &mut [u8]) -> Result<usize, Errno> {
    let path = c_path(path)?;
    // SAFETY: as for `get`.
    let ret = unsafe { libc::llistxattr(path.as_ptr(), buf.as_mut_ptr().cast(), buf.len()) };
    byte_count(ret)
}

pub fn remove(path: &Path, name: &OsStr) -> Result<(), Errno> {
    let path = c_path(path)?;
    let name = c_name(name)?;
    // SAFETY: both strings are NUL-terminated.
    let ret = unsafe { libc::lremovexattr(path.as_ptr(), name.as_ptr()) };
    Errno::result(ret).map(drop)
}
