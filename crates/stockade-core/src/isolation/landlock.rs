//! Landlock filesystem sandboxing

use crate::{Result, StockadeError};
use landlock::{
    ABI, Access, AccessFs, Ruleset, RulesetAttr, RulesetCreated, RulesetCreatedAttr,
    RulesetStatus, path_beneath_rules,
};
use std::path::{Path, PathBuf};

const TARGET_ABI: ABI = ABI::V2;

/// Configuration for Landlock filesystem restrictions
#[derive(Debug, Clone, Default)]
pub struct LandlockConfig {
    /// Paths with read-only access
    pub ro_paths: Vec<PathBuf>,
    /// Paths with read-write access
    pub rw_paths: Vec<PathBuf>,
    /// Paths with execute permission
    pub exec_paths: Vec<PathBuf>,
}

impl LandlockConfig {
    /// Add a read-only path
    #[must_use]
    pub fn ro(mut self, path: impl Into<PathBuf>) -> Self {
        self.ro_paths.push(path.into());
        self
    }

    /// Add a read-write path
    #[must_use]
    pub fn rw(mut self, path: impl Into<PathBuf>) -> Self {
        self.rw_paths.push(path.into());
        self
    }

    /// Add an executable path
    #[must_use]
    pub fn exec(mut self, path: impl Into<PathBuf>) -> Self {
        self.exec_paths.push(path.into());
        self
    }

    /// Build the ruleset in the parent. Paths that do not exist on this host
    /// are skipped. The returned ruleset is enforced in the child with
    /// [`restrict`].
    pub fn prepare(&self) -> Result<RulesetCreated> {
        tracing::debug!(
            ro = self.ro_paths.len(),
            rw = self.rw_paths.len(),
            exec = self.exec_paths.len(),
            "preparing landlock rules"
        );

        let read = AccessFs::from_read(TARGET_ABI);
        let exec_read = read | AccessFs::Execute;
        let all = AccessFs::from_all(TARGET_ABI);

        Ruleset::default()
            .handle_access(all)
            .and_then(|r| r.create())
            .and_then(|r| r.add_rules(path_beneath_rules(existing(&self.ro_paths), read)))
            .and_then(|r| r.add_rules(path_beneath_rules(existing(&self.exec_paths), exec_read)))
            .and_then(|r| r.add_rules(path_beneath_rules(existing(&self.rw_paths), all)))
            .map_err(|e| StockadeError::Landlock(e.to_string()))
    }
}

fn existing(paths: &[PathBuf]) -> impl Iterator<Item = &Path> {
    paths.iter().map(PathBuf::as_path).filter(|p| p.exists())
}

/// Enforce a prepared ruleset on the calling process. Called in the forked child.
///
/// On kernels without Landlock the ruleset is not enforced and this is a no-op.
pub fn restrict(ruleset: RulesetCreated) -> std::io::Result<RulesetStatus> {
    ruleset
        .restrict_self()
        .map(|status| status.ruleset)
        .map_err(std::io::Error::other)
}

/// Highest Landlock ABI the running kernel supports, 0 when unsupported
#[must_use]
#[allow(unsafe_code, clippy::cast_possible_truncation)]
pub fn kernel_abi() -> i32 {
    const LANDLOCK_CREATE_RULESET_VERSION: libc::c_uint = 1 << 0;
    // SAFETY: querying the ABI version takes no pointers
    let ret = unsafe {
        libc::syscall(
            libc::SYS_landlock_create_ruleset,
            std::ptr::null::<libc::c_void>(),
            0usize,
            LANDLOCK_CREATE_RULESET_VERSION,
        )
    };
    if ret < 0 { 0 } else { ret as i32 }
}
