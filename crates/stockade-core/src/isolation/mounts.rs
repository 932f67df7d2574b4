//! Filesystem setup for units that run inside a language root filesystem
//!
//! The plan is prepared in the parent (all allocation happens there) and
//! applied in the forked child after it has entered a new mount namespace:
//! mount propagation is made private, the unit's scratch directory is bind
//! mounted onto `<root>/sandbox`, and the child chroots into the root.
//! Units get `TMPDIR=/sandbox`, so the root itself can stay read-only.

use crate::{Result, StockadeError};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Where the scratch directory appears inside the root filesystem
pub const SANDBOX_DIR: &str = "/sandbox";

/// Prepared mount operations for one unit
#[derive(Debug, Clone)]
pub struct MountPlan {
    root: CString,
    scratch: CString,
    sandbox: CString,
    sandbox_dir: CString,
}

impl MountPlan {
    /// Prepare a plan that chroots into `root` with `scratch` visible at [`SANDBOX_DIR`].
    pub fn prepare(root: &Path, scratch: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(StockadeError::Mount(format!(
                "root filesystem {} is not a directory",
                root.display()
            )));
        }

        let sandbox = root.join(SANDBOX_DIR.trim_start_matches('/'));
        std::fs::create_dir_all(&sandbox).map_err(|e| {
            StockadeError::Mount(format!("failed to create {}: {e}", sandbox.display()))
        })?;

        Ok(Self {
            root: path_to_cstring(root)?,
            scratch: path_to_cstring(scratch)?,
            sandbox: path_to_cstring(&sandbox)?,
            sandbox_dir: path_to_cstring(Path::new(SANDBOX_DIR))?,
        })
    }

    /// Apply the plan. Called in the forked child inside a new mount namespace.
    pub fn apply(&self) -> io::Result<()> {
        make_private()?;
        mount_bind(&self.scratch, &self.sandbox)?;
        chroot(&self.root)?;
        chdir(&self.sandbox_dir)
    }
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| StockadeError::Mount(format!("invalid path {}: {}", path.display(), e)))
}

/// Path of the scratch directory as seen by the unit
#[must_use]
pub fn unit_workdir(scratch: &Path, chrooted: bool) -> PathBuf {
    if chrooted {
        PathBuf::from(SANDBOX_DIR)
    } else {
        scratch.to_path_buf()
    }
}

// Helper functions for mount operations. They only issue syscalls on
// prepared strings so they are safe to call between fork and exec.

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[allow(unsafe_code)]
fn make_private() -> io::Result<()> {
    // SAFETY: mount syscall with static, NUL-terminated target
    check(unsafe {
        libc::mount(
            std::ptr::null(),
            c"/".as_ptr(),
            std::ptr::null(),
            libc::MS_REC | libc::MS_PRIVATE,
            std::ptr::null(),
        )
    })
}

#[allow(unsafe_code)]
fn mount_bind(src: &CString, dst: &CString) -> io::Result<()> {
    // SAFETY: mount syscall with bind flag on prepared paths
    check(unsafe {
        libc::mount(
            src.as_ptr(),
            dst.as_ptr(),
            std::ptr::null(),
            libc::MS_BIND | libc::MS_REC,
            std::ptr::null(),
        )
    })?;

    // SAFETY: remount the bind mount without setuid binaries or device nodes
    check(unsafe {
        libc::mount(
            std::ptr::null(),
            dst.as_ptr(),
            std::ptr::null(),
            libc::MS_BIND | libc::MS_REMOUNT | libc::MS_NOSUID | libc::MS_NODEV,
            std::ptr::null(),
        )
    })
}

#[allow(unsafe_code)]
fn chroot(root: &CString) -> io::Result<()> {
    // SAFETY: chroot syscall on prepared path
    check(unsafe { libc::chroot(root.as_ptr()) })
}

#[allow(unsafe_code)]
fn chdir(dir: &CString) -> io::Result<()> {
    // SAFETY: chdir syscall on prepared path
    check(unsafe { libc::chdir(dir.as_ptr()) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_creates_mount_points() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let plan = MountPlan::prepare(root.path(), scratch.path()).unwrap();

        assert!(root.path().join("sandbox").is_dir());
        assert_eq!(plan.sandbox_dir.to_str().unwrap(), SANDBOX_DIR);
    }

    #[test]
    fn prepare_rejects_missing_root() {
        let scratch = tempfile::tempdir().unwrap();
        let err = MountPlan::prepare(Path::new("/no/such/root"), scratch.path()).unwrap_err();
        assert!(matches!(err, StockadeError::Mount(_)));
    }

    #[test]
    fn workdir_depends_on_chroot() {
        let scratch = Path::new("/var/lib/stockade/scratch/job");
        assert_eq!(unit_workdir(scratch, true), PathBuf::from("/sandbox"));
        assert_eq!(unit_workdir(scratch, false), scratch.to_path_buf());
    }
}
