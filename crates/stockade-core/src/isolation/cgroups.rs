//! Cgroups v2 resource limits

use crate::{Result, StockadeError};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name prefix of every per-unit cgroup, used to find orphans
pub const UNIT_PREFIX: &str = "unit-";

/// Limits written into a unit's cgroup before any process joins it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupLimits {
    /// Memory limit in bytes (memory.max)
    pub memory_max: u64,
    /// Maximum number of processes (pids.max)
    pub pids_max: u32,
    /// CPU quota in microseconds per period (cpu.max), `None` for unlimited
    pub cpu_quota_us: Option<u64>,
    /// CPU period in microseconds
    pub cpu_period_us: u64,
    /// Enable memory swap (memory.swap.max)
    pub allow_swap: bool,
}

impl Default for CgroupLimits {
    fn default() -> Self {
        Self {
            memory_max: 256 * 1024 * 1024, // 256MB
            pids_max: 64,
            cpu_quota_us: None,
            cpu_period_us: 100_000,
            allow_swap: false,
        }
    }
}

/// The delegated subtree all unit cgroups live under
#[derive(Debug, Clone)]
pub struct CgroupRoot {
    path: PathBuf,
}

impl CgroupRoot {
    /// Create the root if needed and enable the controllers units rely on.
    pub fn prepare(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let parent = path
            .parent()
            .ok_or_else(|| StockadeError::Cgroup(format!("{} has no parent", path.display())))?;

        if !parent.join("cgroup.controllers").exists() {
            return Err(StockadeError::Cgroup(format!(
                "{} is not on a cgroup v2 hierarchy",
                parent.display()
            )));
        }

        fs::create_dir_all(&path)
            .map_err(|e| StockadeError::Cgroup(format!("failed to create {}: {e}", path.display())))?;

        // Controllers must be enabled on the parent before the root can use them,
        // then on the root so unit children get them.
        enable_controllers(parent)?;
        enable_controllers(&path)?;

        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create and configure a cgroup for one unit
    pub fn create_unit(&self, name: &str, limits: &CgroupLimits) -> Result<CgroupHandle> {
        let path = self.path.join(format!("{UNIT_PREFIX}{name}"));
        tracing::debug!(
            cgroup = %path.display(),
            memory = limits.memory_max,
            pids = limits.pids_max,
            cpu_quota = ?limits.cpu_quota_us,
            "creating cgroup"
        );

        fs::create_dir(&path)
            .map_err(|e| StockadeError::Cgroup(format!("failed to create {}: {e}", path.display())))?;

        let handle = CgroupHandle { path };
        handle.write("memory.max", &limits.memory_max.to_string())?;
        handle.write("pids.max", &limits.pids_max.to_string())?;
        if !limits.allow_swap {
            // memory.swap.max is absent when swap accounting is off
            if let Err(e) = handle.write("memory.swap.max", "0") {
                tracing::debug!(error = %e, "swap limit not applied");
            }
        }
        if let Some(quota) = limits.cpu_quota_us {
            handle.write("cpu.max", &format!("{quota} {}", limits.cpu_period_us))?;
        }

        Ok(handle)
    }

    /// Kill and remove unit cgroups left behind by a previous run
    pub fn reap_orphans(&self) -> Result<usize> {
        let mut reaped = 0;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(UNIT_PREFIX) || !entry.path().is_dir() {
                continue;
            }

            let handle = CgroupHandle { path: entry.path() };
            handle.kill();
            match handle.remove() {
                Ok(()) => reaped += 1,
                Err(e) => tracing::warn!(cgroup = ?name, error = %e, "failed to reap orphaned cgroup"),
            }
        }
        Ok(reaped)
    }
}

fn enable_controllers(path: &Path) -> Result<()> {
    let available = fs::read_to_string(path.join("cgroup.controllers"))
        .map_err(|e| StockadeError::Cgroup(format!("failed to read controllers: {e}")))?;

    for controller in ["memory", "pids", "cpu"] {
        if !available.split_whitespace().any(|c| c == controller) {
            return Err(StockadeError::Cgroup(format!(
                "controller {controller} not available under {}",
                path.display()
            )));
        }
    }

    fs::write(path.join("cgroup.subtree_control"), "+memory +pids +cpu").map_err(|e| {
        StockadeError::Cgroup(format!(
            "failed to enable controllers under {}: {e}",
            path.display()
        ))
    })
}

/// Handle to a unit's cgroup. Dropping it kills remaining members and removes the cgroup.
#[derive(Debug)]
pub struct CgroupHandle {
    path: PathBuf,
}

impl CgroupHandle {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open `cgroup.procs` for the child to join with a single `write("0")`
    /// before it execs.
    pub fn procs_file(&self) -> Result<File> {
        OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(self.path.join("cgroup.procs"))
            .map_err(|e| StockadeError::Cgroup(format!("failed to open cgroup.procs: {e}")))
    }

    /// Get current memory usage
    pub fn memory_current(&self) -> Result<u64> {
        self.read_u64("memory.current")
    }

    /// Get peak memory usage, when the kernel tracks it
    #[must_use]
    pub fn memory_peak(&self) -> Option<u64> {
        self.read_u64("memory.peak").ok()
    }

    /// Total CPU time consumed by members, living and dead
    pub fn cpu_usage(&self) -> Result<Duration> {
        let stat = self.read("cpu.stat")?;
        let usec = keyed_value(&stat, "usage_usec")
            .ok_or_else(|| StockadeError::Cgroup("cpu.stat has no usage_usec".into()))?;
        Ok(Duration::from_micros(usec))
    }

    /// Check if OOM killed
    pub fn was_oom_killed(&self) -> Result<bool> {
        let events = self.read("memory.events")?;
        Ok(keyed_value(&events, "oom_kill").is_some_and(|n| n > 0))
    }

    /// SIGKILL every member. Uses `cgroup.kill` when the kernel has it.
    pub fn kill(&self) {
        if self.write("cgroup.kill", "1").is_ok() {
            return;
        }

        let Ok(procs) = self.read("cgroup.procs") else {
            return;
        };
        for pid in procs.lines().filter_map(|l| l.trim().parse::<i32>().ok()) {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid),
                nix::sys::signal::Signal::SIGKILL,
            );
        }
    }

    /// Remove the cgroup. Members must be gone; killed members can take a
    /// moment to leave, so this retries briefly.
    pub fn remove(&self) -> Result<()> {
        let mut last = None;
        for _ in 0..50 {
            match fs::remove_dir(&self.path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => last = Some(e),
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        Err(StockadeError::Cgroup(format!(
            "failed to remove {}: {}",
            self.path.display(),
            last.map_or_else(|| "unknown".to_string(), |e| e.to_string())
        )))
    }

    fn read(&self, file: &str) -> Result<String> {
        fs::read_to_string(self.path.join(file))
            .map_err(|e| StockadeError::Cgroup(format!("failed to read {file}: {e}")))
    }

    fn read_u64(&self, file: &str) -> Result<u64> {
        self.read(file)?
            .trim()
            .parse()
            .map_err(|e| StockadeError::Cgroup(format!("malformed {file}: {e}")))
    }

    fn write(&self, file: &str, value: &str) -> Result<()> {
        OpenOptions::new()
            .write(true)
            .open(self.path.join(file))
            .and_then(|mut f| f.write_all(value.as_bytes()))
            .map_err(|e| StockadeError::Cgroup(format!("failed to write {file}: {e}")))
    }
}

impl Drop for CgroupHandle {
    fn drop(&mut self) {
        self.kill();
        if let Err(e) = self.remove() {
            tracing::warn!(error = %e, "cgroup left behind");
        } else {
            tracing::debug!(cgroup = %self.path.display(), "destroyed cgroup");
        }
    }
}

/// Value of `key` in a flat-keyed cgroup file such as `memory.events`
fn keyed_value(contents: &str, key: &str) -> Option<u64> {
    contents.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        (parts.next() == Some(key))
            .then(|| parts.next().and_then(|v| v.parse().ok()))
            .flatten()
    })
}
