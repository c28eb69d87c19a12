//! Owned directory descriptors.

use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use log::debug;
use nix::errno::Errno;

use crate::error::{Error, Result};

/// An open directory descriptor tied to the path it was opened from.
///
/// The descriptor is opened without `O_CLOEXEC`: engines hand it to a child
/// process that resolves it through `/proc/self/fd`, so it has to survive
/// the exec. It stays open until the handle is released or dropped, and is
/// closed exactly once.
#[derive(Debug)]
pub struct DirHandle {
    path: PathBuf,
    raw: RawFd,
    fd: Option<OwnedFd>,
}

impl DirHandle {
    /// Opens `path` read-only with `O_DIRECTORY`.
    ///
    /// Fails with [`Error::DirectoryNotFound`] when the path is missing, is
    /// not a directory, or cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<DirHandle> {
        let path = path.as_ref().to_path_buf();
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            Error::DirectoryNotFound {
                path: path.clone(),
                source: Errno::EINVAL,
            }
        })?;

        let raw = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY) };
        if raw < 0 {
            return Err(Error::DirectoryNotFound {
                path,
                source: Errno::last(),
            });
        }

        debug!("opened directory fd {} for {}", raw, path.display());
        // Just returned by open(2), not owned by anything else yet.
        let fd = Some(unsafe { OwnedFd::from_raw_fd(raw) });
        Ok(DirHandle { path, raw, fd })
    }

    /// The path this handle was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the descriptor is still open.
    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Closes the descriptor. Further calls do nothing.
    pub fn release(&mut self) {
        if let Some(fd) = self.fd.take() {
            debug!("closing directory fd {} for {}", self.raw, self.path.display());
            drop(fd);
        }
    }
}

impl AsRawFd for DirHandle {
    /// The descriptor value. After [`DirHandle::release`] this is only
    /// meaningful for diagnostics.
    fn as_raw_fd(&self) -> RawFd {
        self.raw
    }
}

impl Drop for DirHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, MutexGuard};

    use super::*;

    // Closed descriptor numbers are reused by the next open in the process,
    // so tests that probe fd liveness must not run concurrently.
    static FD_PROBES: Mutex<()> = Mutex::new(());

    fn probe_slot() -> MutexGuard<'static, ()> {
        FD_PROBES.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn fd_is_open(fd: RawFd) -> bool {
        unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
    }

    #[test]
    fn opens_an_existing_directory() {
        let _slot = probe_slot();
        let dir = tempfile::tempdir().unwrap();
        let handle = DirHandle::open(dir.path()).unwrap();
        assert!(handle.is_open());
        assert!(handle.as_raw_fd() >= 0);
        assert_eq!(handle.path(), dir.path());
        assert!(fd_is_open(handle.as_raw_fd()));
    }

    #[test]
    fn rejects_a_missing_path() {
        let err = DirHandle::open("/definitely/not/here").unwrap_err();
        match err {
            Error::DirectoryNotFound { path, source } => {
                assert_eq!(path, Path::new("/definitely/not/here"));
                assert_eq!(source, Errno::ENOENT);
            }
            other => panic!("expected DirectoryNotFound, got {other:?}"),
        }
    }

    #[test]
    fn rejects_a_regular_file() {
        let _slot = probe_slot();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        let err = DirHandle::open(&file).unwrap_err();
        match err {
            Error::DirectoryNotFound { source, .. } => assert_eq!(source, Errno::ENOTDIR),
            other => panic!("expected DirectoryNotFound, got {other:?}"),
        }
    }

    #[test]
    fn release_closes_once_and_is_idempotent() {
        let _slot = probe_slot();
        let dir = tempfile::tempdir().unwrap();
        let mut handle = DirHandle::open(dir.path()).unwrap();
        let raw = handle.as_raw_fd();
        assert!(fd_is_open(raw));

        handle.release();
        assert!(!handle.is_open());
        assert!(!fd_is_open(raw));

        // Second release must not touch the (now unrelated) fd number.
        handle.release();
        assert!(!handle.is_open());
        assert_eq!(handle.as_raw_fd(), raw);
    }

    #[test]
    fn drop_closes_the_descriptor() {
        let _slot = probe_slot();
        let dir = tempfile::tempdir().unwrap();
        let handle = DirHandle::open(dir.path()).unwrap();
        let raw = handle.as_raw_fd();
        drop(handle);
        assert!(!fd_is_open(raw));
    }

    #[test]
    fn descriptor_is_inheritable_across_exec() {
        let _slot = probe_slot();
        let dir = tempfile::tempdir().unwrap();
        let handle = DirHandle::open(dir.path()).unwrap();
        let flags = unsafe { libc::fcntl(handle.as_raw_fd(), libc::F_GETFD) };
        assert_eq!(flags & libc::FD_CLOEXEC, 0);
    }
}
