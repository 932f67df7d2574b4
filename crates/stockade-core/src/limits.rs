//! Resource limiter: attaches ceilings to a unit and watches it run

use crate::config::SandboxConfig;
use crate::isolation::{CgroupHandle, CgroupLimits, CgroupRoot};
use crate::job::ResourceLimits;
use crate::result::{KillReason, Usage};
use crate::unit::ExecutionUnit;
use crate::Result;
use nix::sys::resource::{Resource, setrlimit};
use nix::unistd::Pid;
use std::fs::File;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Per-process rlimits set in the child before exec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlimitPlan {
    pub cpu_secs: u64,
    /// Data segment ceiling. Armed only when no cgroup accounts the unit's
    /// memory, so a large allocation fails instead of going unnoticed.
    pub data_bytes: Option<u64>,
    pub file_bytes: u64,
    pub open_files: u64,
    /// Only set when the unit runs under its own uid and no cgroup counts pids
    pub processes: Option<u64>,
}

impl RlimitPlan {
    /// Apply to the calling process. Called in the forked child.
    pub fn apply(&self) -> io::Result<()> {
        // SIGXCPU at the soft limit, SIGKILL one second later
        setrlimit(Resource::RLIMIT_CPU, self.cpu_secs, self.cpu_secs + 1)?;
        if let Some(bytes) = self.data_bytes {
            setrlimit(Resource::RLIMIT_DATA, bytes, bytes)?;
        }
        setrlimit(Resource::RLIMIT_FSIZE, self.file_bytes, self.file_bytes)?;
        setrlimit(Resource::RLIMIT_NOFILE, self.open_files, self.open_files)?;
        setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
        if let Some(n) = self.processes {
            setrlimit(Resource::RLIMIT_NPROC, n, n)?;
        }
        Ok(())
    }
}

/// Limits attached to a unit before its first instruction
#[derive(Debug)]
pub struct Attachment {
    pub cgroup: Option<CgroupHandle>,
    /// `cgroup.procs` of the unit's cgroup, written by the child
    pub procs: Option<File>,
    pub rlimits: RlimitPlan,
}

/// What the monitor observed while a unit ran
#[derive(Debug)]
pub struct Supervision {
    pub status: io::Result<ExitStatus>,
    pub killed: Option<KillReason>,
    pub oom_killed: bool,
    pub usage: Usage,
}

/// A point-in-time reading of a unit's consumption
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample {
    pub cpu: Duration,
    pub memory: u64,
}

/// Translates a job's limits into enforceable constraints and enforces them
#[derive(Debug, Clone)]
pub struct ResourceLimiter {
    limits: ResourceLimits,
    check_interval: Duration,
    rlimits: RlimitPlan,
    cgroup_limits: CgroupLimits,
}

impl ResourceLimiter {
    #[must_use]
    pub fn new(limits: ResourceLimits, config: &SandboxConfig) -> Self {
        let cpu_secs = limits.max_cpu_time.as_secs_f64().ceil().max(1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let cpu_secs = cpu_secs as u64;

        let own_uid = config.run_as.is_some();
        let rlimits = RlimitPlan {
            cpu_secs,
            data_bytes: None,
            file_bytes: config.max_file_bytes,
            open_files: config.max_open_files,
            processes: (own_uid && !config.isolation.cgroups).then_some(u64::from(config.max_pids)),
        };

        let cgroup_limits = CgroupLimits {
            memory_max: limits.max_memory,
            pids_max: config.max_pids,
            ..CgroupLimits::default()
        };

        Self {
            limits,
            check_interval: config.check_interval,
            rlimits,
            cgroup_limits,
        }
    }

    #[must_use]
    pub const fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    #[must_use]
    pub const fn rlimits(&self) -> &RlimitPlan {
        &self.rlimits
    }

    /// Create the unit's cgroup (when a root is given) with its limits written
    /// and open the file the child joins it through. Rlimits travel with the
    /// attachment and are set by the child itself. Without a cgroup the
    /// data segment is capped at the memory limit instead.
    pub fn apply(&self, cgroup_root: Option<&CgroupRoot>, unit_name: &str) -> Result<Attachment> {
        let Some(root) = cgroup_root else {
            return Ok(Attachment {
                cgroup: None,
                procs: None,
                rlimits: RlimitPlan {
                    data_bytes: Some(self.limits.max_memory),
                    ..self.rlimits
                },
            });
        };

        let cgroup = root.create_unit(unit_name, &self.cgroup_limits)?;
        let procs = cgroup.procs_file()?;
        Ok(Attachment {
            cgroup: Some(cgroup),
            procs: Some(procs),
            rlimits: self.rlimits,
        })
    }

    /// Which ceiling a sample breaches, if any
    #[must_use]
    pub fn breach(&self, elapsed: Duration, sample: Sample) -> Option<KillReason> {
        if elapsed >= self.limits.max_wall_clock {
            Some(KillReason::WallClock)
        } else if sample.cpu >= self.limits.max_cpu_time {
            Some(KillReason::CpuTime)
        } else if sample.memory > self.limits.max_memory {
            Some(KillReason::Memory)
        } else {
            None
        }
    }

    /// Supervise `unit` until its leader exits.
    ///
    /// Every check interval the unit's wall clock, CPU time and memory are
    /// sampled; the whole unit is killed as soon as a ceiling is breached or
    /// `cancel` fires. Once the leader is gone the rest of its group is killed.
    pub async fn enforce(&self, unit: &mut ExecutionUnit, cancel: &CancellationToken) -> Supervision {
        let started = unit.started_at();
        let deadline = started + self.limits.max_wall_clock;
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut killed = None;
        let mut observed = Sample::default();

        let status = loop {
            tokio::select! {
                status = unit.wait() => break status,
                () = cancel.cancelled(), if killed.is_none() => {
                    killed = Some(KillReason::Cancelled);
                    unit.kill();
                }
                () = tokio::time::sleep_until(deadline), if killed.is_none() => {
                    killed = Some(KillReason::WallClock);
                    unit.kill();
                }
                _ = ticker.tick(), if killed.is_none() => {
                    let sample = sample(unit);
                    observed.cpu = observed.cpu.max(sample.cpu);
                    observed.memory = observed.memory.max(sample.memory);
                    if let Some(reason) = self.breach(started.elapsed(), sample) {
                        tracing::debug!(
                            pgid = %unit.pgid(),
                            reason = ?reason,
                            cpu = ?sample.cpu,
                            memory = sample.memory,
                            "limit breached"
                        );
                        killed = Some(reason);
                        unit.kill();
                    }
                }
            }
        };
        let wall = started.elapsed();

        // Stragglers must not outlive the leader
        unit.kill();

        let mut oom_killed = false;
        if let Some(cgroup) = unit.cgroup() {
            if let Ok(cpu) = cgroup.cpu_usage() {
                observed.cpu = observed.cpu.max(cpu);
            }
            if let Some(peak) = cgroup.memory_peak() {
                observed.memory = observed.memory.max(peak);
            }
            oom_killed = cgroup.was_oom_killed().unwrap_or(false);
        }

        Supervision {
            status,
            killed,
            oom_killed,
            usage: Usage {
                wall,
                cpu: observed.cpu,
                memory_peak: observed.memory,
            },
        }
    }
}

/// Current consumption of every process in the unit
#[must_use]
pub fn sample(unit: &ExecutionUnit) -> Sample {
    match unit.cgroup() {
        Some(cgroup) => sample_cgroup(cgroup),
        None => sample_process_group(unit.pgid()),
    }
}

fn sample_cgroup(cgroup: &CgroupHandle) -> Sample {
    Sample {
        cpu: cgroup.cpu_usage().unwrap_or_default(),
        memory: cgroup.memory_current().unwrap_or_default(),
    }
}

/// Sum CPU time and resident memory over `/proc` entries in process group `pgid`
#[allow(clippy::cast_precision_loss)]
fn sample_process_group(pgid: Pid) -> Sample {
    let ticks = clock_ticks();
    let page = page_size();
    let mut total = Sample::default();

    let Ok(entries) = std::fs::read_dir("/proc") else {
        return total;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            continue;
        };
        if let Some(proc_stat) = ProcStat::parse(&stat) {
            if proc_stat.pgrp == pgid.as_raw() {
                total.cpu += Duration::from_secs_f64(proc_stat.cpu_ticks as f64 / ticks);
                total.memory += proc_stat.rss_pages * page;
            }
        }
    }
    total
}

/// The fields of `/proc/<pid>/stat` the monitor needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcStat {
    pgrp: i32,
    /// utime + stime + cutime + cstime
    cpu_ticks: u64,
    rss_pages: u64,
}

impl ProcStat {
    fn parse(stat: &str) -> Option<Self> {
        // The command name may contain spaces and parentheses; fields resume
        // after the last ')'. Index 0 below is field 3 (state).
        let rest = &stat[stat.rfind(')')? + 1..];
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let num = |i: usize| fields.get(i).and_then(|f| f.parse::<u64>().ok());

        Some(Self {
            pgrp: fields.get(2)?.parse().ok()?,
            cpu_ticks: num(11)? + num(12)? + num(13)? + num(14)?,
            rss_pages: num(21)?,
        })
    }
}

#[allow(unsafe_code, clippy::cast_precision_loss)]
fn clock_ticks() -> f64 {
    // SAFETY: sysconf has no preconditions
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as f64 } else { 100.0 }
}

#[allow(unsafe_code, clippy::cast_sign_loss)]
fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as u64 } else { 4096 }
}
