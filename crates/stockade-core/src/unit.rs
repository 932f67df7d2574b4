//! Execution units: one confined process group per command

use crate::config::Identity;
use crate::isolation::{CgroupHandle, MountPlan, NamespaceConfig, landlock, seccomp};
use crate::limits::RlimitPlan;
use crate::{Result, StockadeError};
use ::landlock::RulesetCreated;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::{Gid, Pid, Uid};
use seccompiler::BpfProgram;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::Instant;

/// Steps the child applies to itself between fork and exec, in this order:
/// join the cgroup, set rlimits, enter namespaces, chroot, drop identity,
/// restrict filesystem access, install the syscall filter.
///
/// Everything here is prepared in the parent so the child only issues
/// syscalls.
#[derive(Default)]
pub struct ChildSetup {
    pub cgroup_procs: Option<File>,
    pub rlimits: Option<RlimitPlan>,
    pub namespaces: Option<NamespaceConfig>,
    pub mounts: Option<MountPlan>,
    pub identity: Option<Identity>,
    pub landlock: Option<RulesetCreated>,
    pub seccomp: Option<BpfProgram>,
}

impl std::fmt::Debug for ChildSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildSetup")
            .field("cgroup", &self.cgroup_procs.is_some())
            .field("rlimits", &self.rlimits)
            .field("namespaces", &self.namespaces)
            .field("mounts", &self.mounts.is_some())
            .field("identity", &self.identity)
            .field("landlock", &self.landlock.is_some())
            .field("seccomp", &self.seccomp.is_some())
            .finish()
    }
}

impl ChildSetup {
    #[allow(unsafe_code)]
    fn apply(&mut self) -> io::Result<()> {
        // SAFETY: PR_SET_PDEATHSIG takes a signal number only
        if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) } != 0 {
            return Err(io::Error::last_os_error());
        }

        if let Some(procs) = self.cgroup_procs.as_mut() {
            procs.write_all(b"0")?;
        }
        if let Some(rlimits) = &self.rlimits {
            rlimits.apply()?;
        }
        if let Some(namespaces) = &self.namespaces {
            namespaces.enter()?;
        }
        if let Some(mounts) = &self.mounts {
            mounts.apply()?;
        }
        if let Some(identity) = self.identity {
            let gid = Gid::from_raw(identity.gid);
            nix::unistd::setgroups(&[gid])?;
            nix::unistd::setgid(gid)?;
            nix::unistd::setuid(Uid::from_raw(identity.uid))?;
        }
        // SAFETY: PR_SET_NO_NEW_PRIVS takes plain integers
        if unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) } != 0 {
            return Err(io::Error::last_os_error());
        }
        if let Some(ruleset) = self.landlock.take() {
            landlock::restrict(ruleset)?;
        }
        if let Some(program) = &self.seccomp {
            seccomp::install(program)?;
        }
        Ok(())
    }
}

/// A command ready to be launched as an execution unit
#[derive(Debug)]
pub struct UnitCommand {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Working directory as seen before any chroot
    pub workdir: PathBuf,
    pub stdin: File,
    pub cgroup: Option<CgroupHandle>,
    pub setup: ChildSetup,
    /// Scratch directory shared by the units of one job
    pub scratch: Arc<TempDir>,
}

/// A live, confined process group bound to one job.
///
/// Dropping the unit kills every process in its group, then the cgroup
/// (if any) is killed and removed, and the scratch directory is deleted
/// once the last unit of the job is gone.
#[derive(Debug)]
pub struct ExecutionUnit {
    child: Child,
    pgid: Pid,
    cgroup: Option<CgroupHandle>,
    started_at: Instant,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    _scratch: Arc<TempDir>,
}

impl ExecutionUnit {
    /// Launch the command in its own process group with `setup` applied before exec.
    #[allow(unsafe_code)]
    pub fn spawn(command: UnitCommand) -> Result<Self> {
        let UnitCommand {
            argv,
            env,
            workdir,
            stdin,
            cgroup,
            mut setup,
            scratch,
        } = command;

        let (program, args) = argv
            .split_first()
            .ok_or_else(|| StockadeError::Execution("empty command".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env_clear()
            .envs(env)
            .current_dir(&workdir)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        // SAFETY: the hook only issues syscalls on data prepared above
        unsafe {
            cmd.pre_exec(move || setup.apply());
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| StockadeError::Execution(format!("failed to spawn {program}: {e}")))?;

        let pid = child
            .id()
            .ok_or_else(|| StockadeError::Execution("child exited before it was tracked".into()))?;
        #[allow(clippy::cast_possible_wrap)]
        let pgid = Pid::from_raw(pid as i32);

        tracing::debug!(
            pid = pid,
            program = %program,
            cgroup = cgroup.is_some(),
            "execution unit started"
        );

        Ok(Self {
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
            pgid,
            cgroup,
            started_at: Instant::now(),
            _scratch: scratch,
        })
    }

    #[must_use]
    pub const fn pgid(&self) -> Pid {
        self.pgid
    }

    #[must_use]
    pub const fn cgroup(&self) -> Option<&CgroupHandle> {
        self.cgroup.as_ref()
    }

    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    pub const fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub const fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Wait for the group leader to exit
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// SIGKILL every process of the unit. Safe to call repeatedly.
    pub fn kill(&self) {
        if let Err(e) = killpg(self.pgid, Signal::SIGKILL) {
            if e != nix::errno::Errno::ESRCH {
                tracing::warn!(pgid = %self.pgid, error = %e, "failed to kill process group");
            }
        }
        if let Some(cgroup) = &self.cgroup {
            cgroup.kill();
        }
    }
}

impl Drop for ExecutionUnit {
    fn drop(&mut self) {
        self.kill();
    }
}
