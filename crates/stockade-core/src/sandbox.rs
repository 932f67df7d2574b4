//! Execution sandbox: runs one job in isolated, resource-bounded units

use crate::collector::collect;
use crate::config::{IsolationConfig, LanguageConfig, SandboxConfig};
use crate::isolation::mounts::{self, MountPlan};
use crate::isolation::{CgroupRoot, IsolationSupport, LandlockConfig, NamespaceConfig, SeccompConfig};
use crate::job::{Job, ResourceLimits};
use crate::limits::ResourceLimiter;
use crate::pipe::{Captured, capture, sealed_stdin};
use crate::result::{Phase, RawOutcome, Termination};
use crate::unit::{ChildSetup, ExecutionUnit, UnitCommand};
use crate::verdict::Verdict;
use crate::{Result, StockadeError};
use async_trait::async_trait;
use seccompiler::BpfProgram;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Prefix of every scratch directory, used to find orphans
pub const SCRATCH_PREFIX: &str = "stockade-";

/// Runs jobs to a verdict. The scheduler depends on this seam only.
#[async_trait]
pub trait Executor: Send + Sync + std::fmt::Debug {
    /// Run `job` to completion. Never fails: every problem becomes a verdict.
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> Verdict;
}

/// Launches isolated execution units for jobs
pub struct Sandbox {
    config: SandboxConfig,
    languages: Vec<LanguageConfig>,
    support: IsolationSupport,
    cgroup_root: Option<CgroupRoot>,
    seccomp: Option<BpfProgram>,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("isolation", &self.config.isolation)
            .field("languages", &self.languages.len())
            .field("cgroup_root", &self.cgroup_root)
            .field("seccomp", &self.seccomp.is_some())
            .finish_non_exhaustive()
    }
}

/// One command of a language, ready to be launched
struct PhasePlan<'a> {
    phase: Phase,
    argv: &'a [String],
    limits: ResourceLimits,
    stdin: &'a [u8],
    compile_error_code: Option<i32>,
}

impl Sandbox {
    /// Probe the host and build a sandbox.
    ///
    /// Fails when isolation is required and an enabled facility is missing,
    /// or when the scratch root cannot be created.
    pub fn new(config: SandboxConfig, languages: Vec<LanguageConfig>) -> Result<Self> {
        let support = IsolationSupport::detect(&config);
        Self::with_support(config, languages, support)
    }

    /// Build a sandbox for an already probed host
    pub fn with_support(
        mut config: SandboxConfig,
        languages: Vec<LanguageConfig>,
        support: IsolationSupport,
    ) -> Result<Self> {
        support.ensure_required(&config.isolation)?;
        config.isolation = support.effective(&config.isolation);
        if !support.root && config.run_as.take().is_some() {
            tracing::warn!("not running as root, executed code keeps the daemon's identity");
        }

        std::fs::create_dir_all(&config.scratch_root).map_err(|e| {
            StockadeError::Config(format!(
                "scratch root {} is not usable: {e}",
                config.scratch_root.display()
            ))
        })?;

        let cgroup_root = if config.isolation.cgroups {
            Some(CgroupRoot::prepare(&config.cgroup_root)?)
        } else {
            None
        };

        let seccomp = if config.isolation.seccomp {
            Some(SeccompConfig::for_unit(config.isolation.allow_network).compile()?)
        } else {
            None
        };

        tracing::info!(
            languages = languages.len(),
            namespaces = config.isolation.namespaces,
            cgroups = config.isolation.cgroups,
            seccomp = config.isolation.seccomp,
            landlock = config.isolation.landlock,
            run_as = ?config.run_as,
            "sandbox ready"
        );

        Ok(Self {
            config,
            languages,
            support,
            cgroup_root,
            seccomp,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Isolation facilities in effect for every unit
    #[must_use]
    pub const fn isolation(&self) -> &IsolationConfig {
        &self.config.isolation
    }

    #[must_use]
    pub const fn support(&self) -> IsolationSupport {
        self.support
    }

    #[must_use]
    pub fn languages(&self) -> &[LanguageConfig] {
        &self.languages
    }

    /// Look up a language by name or alias
    #[must_use]
    pub fn language(&self, tag: &str) -> Option<&LanguageConfig> {
        self.languages.iter().find(|l| l.matches(tag))
    }

    /// Remove scratch directories and cgroups left behind by a previous run.
    /// Must be called before any job runs.
    pub fn reap_orphans(&self) -> Result<usize> {
        let mut reaped = 0;
        for entry in std::fs::read_dir(&self.config.scratch_root)? {
            let entry = entry?;
            if !entry.file_name().to_string_lossy().starts_with(SCRATCH_PREFIX) {
                continue;
            }
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => reaped += 1,
                Err(e) => tracing::warn!(
                    path = %entry.path().display(),
                    error = %e,
                    "failed to remove orphaned scratch directory"
                ),
            }
        }

        if let Some(root) = &self.cgroup_root {
            reaped += root.reap_orphans()?;
        }

        if reaped > 0 {
            tracing::info!(reaped, "reaped orphaned execution units");
        }
        Ok(reaped)
    }

    /// Run `job` to a verdict: optional compile unit, then the run unit.
    pub async fn run(&self, job: &Job, cancel: &CancellationToken) -> Verdict {
        let span = tracing::info_span!("job", job_id = %job.id, language = %job.language);
        self.run_job(job, cancel).instrument(span).await
    }

    async fn run_job(&self, job: &Job, cancel: &CancellationToken) -> Verdict {
        let Some(language) = self.language(&job.language) else {
            tracing::error!("language vanished between admission and execution");
            return Verdict::internal_error(job.id);
        };

        let scratch = match self.prepare_scratch(job, language) {
            Ok(scratch) => scratch,
            Err(e) => {
                return collect(job.id, &RawOutcome::failed(Phase::Run, e.to_string()));
            }
        };

        if let Some(compile) = &language.compile {
            let outcome = self
                .run_phase(
                    job,
                    language,
                    &scratch,
                    PhasePlan {
                        phase: Phase::Compile,
                        argv: compile,
                        limits: self.config.compile_limits,
                        stdin: &[],
                        compile_error_code: None,
                    },
                    cancel,
                )
                .await;

            if !outcome.succeeded() {
                return collect(job.id, &outcome);
            }
            tracing::debug!(wall = ?outcome.usage.wall, "compilation succeeded");
        }

        // A language with its own compile step has no reserved exit code
        let compile_error_code = if language.compile.is_none() {
            language.compile_error_code
        } else {
            None
        };

        let outcome = self
            .run_phase(
                job,
                language,
                &scratch,
                PhasePlan {
                    phase: Phase::Run,
                    argv: &language.run,
                    limits: job.limits,
                    stdin: &job.stdin,
                    compile_error_code,
                },
                cancel,
            )
            .await;

        collect(job.id, &outcome)
    }

    /// Create the job's scratch directory and write its source into it
    fn prepare_scratch(&self, job: &Job, language: &LanguageConfig) -> Result<Arc<TempDir>> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{SCRATCH_PREFIX}{}-", job.id))
            .tempdir_in(&self.config.scratch_root)?;

        let source = scratch.path().join(&language.source_file);
        std::fs::write(&source, &job.source)?;

        if let Some(identity) = self.config.run_as {
            let uid = Some(nix::unistd::Uid::from_raw(identity.uid));
            let gid = Some(nix::unistd::Gid::from_raw(identity.gid));
            nix::unistd::chown(scratch.path(), uid, gid)?;
            nix::unistd::chown(&source, uid, gid)?;
        }

        Ok(Arc::new(scratch))
    }

    async fn run_phase(
        &self,
        job: &Job,
        language: &LanguageConfig,
        scratch: &Arc<TempDir>,
        plan: PhasePlan<'_>,
        cancel: &CancellationToken,
    ) -> RawOutcome {
        let phase = plan.phase;
        match self.launch(job, language, scratch, plan, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => RawOutcome::failed(phase, e.to_string()),
        }
    }

    async fn launch(
        &self,
        job: &Job,
        language: &LanguageConfig,
        scratch: &Arc<TempDir>,
        plan: PhasePlan<'_>,
        cancel: &CancellationToken,
    ) -> Result<RawOutcome> {
        let limiter = ResourceLimiter::new(plan.limits, &self.config);
        let unit_name = format!("{}-{}", job.id, phase_name(plan.phase));
        let attachment = limiter.apply(self.cgroup_root.as_ref(), &unit_name)?;
        let memory_backstop = attachment.rlimits.data_bytes.is_some();

        let root = self.chroot_target(language);
        let workdir = mounts::unit_workdir(scratch.path(), root.is_some());

        let setup = ChildSetup {
            cgroup_procs: attachment.procs,
            rlimits: Some(attachment.rlimits),
            namespaces: self
                .config
                .isolation
                .namespaces
                .then(|| NamespaceConfig::for_unit(self.config.isolation.allow_network)),
            mounts: root
                .map(|root| MountPlan::prepare(root, scratch.path()))
                .transpose()?,
            identity: self.config.run_as,
            landlock: self.landlock_rules(root, scratch.path())?,
            seccomp: self.seccomp.clone(),
        };

        let mut unit = ExecutionUnit::spawn(UnitCommand {
            argv: plan.argv.to_vec(),
            env: self.unit_env(language, &plan.limits, &workdir),
            workdir: scratch.path().to_path_buf(),
            stdin: sealed_stdin(plan.stdin)?,
            cgroup: attachment.cgroup,
            setup,
            scratch: Arc::clone(scratch),
        })?;

        let cap = usize::try_from(plan.limits.max_output_bytes).unwrap_or(usize::MAX);
        let stdout = unit
            .take_stdout()
            .ok_or_else(|| StockadeError::Execution("stdout not captured".into()))?;
        let stderr = unit
            .take_stderr()
            .ok_or_else(|| StockadeError::Execution("stderr not captured".into()))?;
        let stdout_task = tokio::spawn(capture(stdout, cap));
        let stderr_task = tokio::spawn(capture(stderr, cap));

        let supervision = limiter.enforce(&mut unit, cancel).await;
        let status = supervision
            .status
            .map_err(|e| StockadeError::Execution(format!("wait failed: {e}")))?;

        let (stdout, stderr) = self.drain(stdout_task, stderr_task).await?;

        Ok(RawOutcome {
            phase: plan.phase,
            termination: Some(Termination::from(status)),
            killed: supervision.killed,
            oom_killed: supervision.oom_killed,
            stdout,
            stderr,
            usage: supervision.usage,
            memory_limit: plan.limits.max_memory,
            memory_backstop,
            compile_error_code: plan.compile_error_code,
            error: None,
        })
    }

    /// Wait for both capture tasks to see EOF. The unit's group is dead by
    /// now, so open pipes mean a process escaped it.
    async fn drain(
        &self,
        mut stdout: JoinHandle<std::io::Result<Captured>>,
        mut stderr: JoinHandle<std::io::Result<Captured>>,
    ) -> Result<(Captured, Captured)> {
        let joined = tokio::time::timeout(self.config.drain_timeout, async {
            ((&mut stdout).await, (&mut stderr).await)
        })
        .await;

        let Ok((out, err)) = joined else {
            stdout.abort();
            stderr.abort();
            return Err(StockadeError::Execution(
                "output pipes still open after the unit was killed".into(),
            ));
        };

        let join = |r: std::result::Result<std::io::Result<Captured>, tokio::task::JoinError>| {
            r.map_err(|e| StockadeError::Execution(format!("capture task failed: {e}")))?
                .map_err(StockadeError::from)
        };
        Ok((join(out)?, join(err)?))
    }

    /// Root filesystem to chroot into. Needs a private mount namespace.
    fn chroot_target<'a>(&self, language: &'a LanguageConfig) -> Option<&'a Path> {
        let root = language.root.as_deref()?;
        if self.config.isolation.namespaces {
            Some(root)
        } else {
            tracing::warn!(
                language = %language.name,
                "root filesystem ignored without mount namespaces"
            );
            None
        }
    }

    fn landlock_rules(
        &self,
        root: Option<&Path>,
        scratch: &Path,
    ) -> Result<Option<::landlock::RulesetCreated>> {
        if !self.config.isolation.landlock {
            return Ok(None);
        }

        let mut rules = LandlockConfig::default().rw(scratch);
        if let Some(root) = root {
            rules = rules.exec(root);
        } else {
            for path in &self.config.ro_paths {
                rules = rules.exec(path);
            }
            for path in &self.config.rw_paths {
                rules = rules.rw(path);
            }
        }
        rules.prepare().map(Some)
    }

    fn unit_env(
        &self,
        language: &LanguageConfig,
        limits: &ResourceLimits,
        workdir: &Path,
    ) -> Vec<(String, String)> {
        let workdir_str = workdir.display().to_string();
        let source: PathBuf = workdir.join(&language.source_file);

        let mut env = self.config.env.clone();
        env.extend(language.env.iter().cloned());
        env.extend([
            ("HOME".to_string(), workdir_str.clone()),
            ("TMPDIR".to_string(), workdir_str),
            ("STOCKADE_SOURCE".to_string(), source.display().to_string()),
            (
                "TIME_LIMIT_MS".to_string(),
                limits.max_wall_clock.as_millis().to_string(),
            ),
            ("MEMORY_LIMIT_MB".to_string(), limits.memory_mb().to_string()),
        ]);
        env
    }
}

#[async_trait]
impl Executor for Sandbox {
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> Verdict {
        self.run(job, &cancel).await
    }
}

const fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Compile => "compile",
        Phase::Run => "run",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::{LimitKind, VerdictStatus};
    use std::time::Duration;

    fn sandbox(dir: &Path, languages: Vec<LanguageConfig>) -> Sandbox {
        Sandbox::with_support(
            SandboxConfig::unconfined(dir),
            languages,
            IsolationSupport::default(),
        )
        .unwrap()
    }

    fn sh() -> LanguageConfig {
        LanguageConfig::new("sh", "main.sh", ["/bin/sh", "main.sh"])
    }

    fn limits(wall_ms: u64) -> ResourceLimits {
        ResourceLimits {
            max_cpu_time: Duration::from_secs(5),
            max_memory: 256 * 1024 * 1024,
            max_wall_clock: Duration::from_millis(wall_ms),
            max_output_bytes: 1024,
        }
    }

    async fn run(sandbox: &Sandbox, source: &str, stdin: &str, limits: ResourceLimits) -> Verdict {
        let job = Job::new("sh", source, stdin, limits);
        sandbox.run(&job, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn echoes_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path(), vec![sh()]);

        let verdict = run(&sandbox, "cat", "hello\n", limits(5000)).await;

        assert_eq!(verdict.status, VerdictStatus::Success);
        assert_eq!(verdict.stdout, "hello\n");
        assert_eq!(verdict.exit_code, Some(0));
    }

    #[tokio::test]
    async fn unit_environment_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path(), vec![sh()]);

        let verdict = run(
            &sandbox,
            "echo $TIME_LIMIT_MS $MEMORY_LIMIT_MB; test -f \"$STOCKADE_SOURCE\" && test \"$HOME\" = \"$(pwd)\" && echo ok",
            "",
            limits(3000),
        )
        .await;

        assert_eq!(verdict.status, VerdictStatus::Success, "{verdict:?}");
        assert_eq!(verdict.stdout, "3000 256\nok\n");
    }

    #[tokio::test]
    async fn infinite_loop_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path(), vec![sh()]);
        let started = std::time::Instant::now();

        let verdict = run(&sandbox, "echo partial; while :; do :; done", "", limits(300)).await;

        assert_eq!(verdict.status, VerdictStatus::Timeout);
        assert_eq!(verdict.limit, Some(LimitKind::WallClock));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn background_children_die_with_the_unit() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path(), vec![sh()]);

        let verdict = run(&sandbox, "sleep 60 & echo started", "", limits(5000)).await;

        assert_eq!(verdict.status, VerdictStatus::Success);
        assert_eq!(verdict.stdout, "started\n");
    }

    #[tokio::test]
    async fn output_is_truncated_to_cap() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path(), vec![sh()]);

        let verdict = run(
            &sandbox,
            "i=0; while [ $i -lt 500 ]; do echo 0123456789; i=$((i+1)); done",
            "",
            limits(5000),
        )
        .await;

        assert_eq!(verdict.status, VerdictStatus::OutputTruncated);
        assert!(verdict.stdout_truncated);
        assert_eq!(verdict.stdout.len(), 1024);
        assert!(verdict.stdout.starts_with("0123456789\n"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path(), vec![sh()]);

        let verdict = run(&sandbox, "echo oops >&2; exit 3", "", limits(5000)).await;

        assert_eq!(verdict.status, VerdictStatus::RuntimeError);
        assert_eq!(verdict.exit_code, Some(3));
        assert_eq!(verdict.stderr, "oops\n");
    }

    #[tokio::test]
    async fn reserved_exit_code_is_compile_error() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path(), vec![sh()]);

        let verdict = run(&sandbox, "echo 'bad syntax' >&2; exit 200", "", limits(5000)).await;

        assert_eq!(verdict.status, VerdictStatus::CompileError);
        assert!(verdict.stderr.contains("bad syntax"));
    }

    #[tokio::test]
    async fn failed_compile_step_skips_run_phase() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let touch = format!("touch {}", marker.display());
        let compiled = LanguageConfig::new("sh", "main.sh", ["/bin/sh", "-c", touch.as_str()])
            .compile(["/bin/sh", "-c", "echo 'main.sh:1: syntax error' >&2; exit 1"]);
        let sandbox = sandbox(dir.path(), vec![compiled]);

        let verdict = run(&sandbox, "echo hi", "", limits(5000)).await;

        assert_eq!(verdict.status, VerdictStatus::CompileError);
        assert!(verdict.stderr.contains("syntax error"));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn successful_compile_step_feeds_run_phase() {
        let dir = tempfile::tempdir().unwrap();
        let compiled = LanguageConfig::new("sh", "main.sh", ["/bin/sh", "built.sh"])
            .compile(["/bin/cp", "main.sh", "built.sh"]);
        let sandbox = sandbox(dir.path(), vec![compiled]);

        let verdict = run(&sandbox, "echo built; exit 200", "", limits(5000)).await;

        // The reserved code only applies to languages without a compile step
        assert_eq!(verdict.status, VerdictStatus::RuntimeError);
        assert_eq!(verdict.stdout, "built\n");
    }

    #[tokio::test]
    async fn memory_hog_exceeds_memory() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path(), vec![sh()]);
        let limits = ResourceLimits {
            max_memory: 32 * 1024 * 1024,
            ..limits(10_000)
        };

        // Grow in 1MiB steps so the monitor sees the unit near its ceiling
        let verdict = run(
            &sandbox,
            "x=0123456789abcdef; while [ ${#x} -lt 1048576 ]; do x=\"$x$x\"; done; \
             y=; while :; do y=\"$y$x\"; done",
            "",
            limits,
        )
        .await;

        assert_eq!(verdict.status, VerdictStatus::MemoryExceeded, "{verdict:?}");
        assert_eq!(verdict.limit, Some(LimitKind::Memory));
    }

    #[tokio::test]
    async fn single_allocation_over_limit_exceeds_memory() {
        if std::process::Command::new("python3").arg("-V").output().is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path(), vec![sh()]);
        let limits = ResourceLimits {
            max_memory: 32 * 1024 * 1024,
            ..limits(10_000)
        };

        let verdict = run(
            &sandbox,
            "exec python3 -c 'x = bytearray(200 * 1024 * 1024)'",
            "",
            limits,
        )
        .await;

        assert_eq!(verdict.status, VerdictStatus::MemoryExceeded, "{verdict:?}");
        assert_eq!(verdict.limit, Some(LimitKind::Memory));
    }

    #[tokio::test]
    async fn truncation_never_splits_a_character() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path(), vec![sh()]);
        let limits = ResourceLimits {
            max_output_bytes: 3,
            ..limits(5000)
        };

        let verdict = run(&sandbox, "printf '\\303\\251\\303\\251'", "", limits).await;

        assert_eq!(verdict.status, VerdictStatus::OutputTruncated);
        assert!(verdict.stdout_truncated);
        assert_eq!(verdict.stdout, "\u{e9}");
    }

    #[tokio::test]
    async fn cancellation_kills_running_unit() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path(), vec![sh()]);
        let job = Job::new("sh", "sleep 30", "", limits(60_000));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let verdict = sandbox.run(&job, &cancel).await;
        assert_eq!(verdict.status, VerdictStatus::Cancelled);
    }

    #[tokio::test]
    async fn concurrent_jobs_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path(), vec![sh()]);
        let source = "echo local > note; sleep 0.2; cat; cat note";

        let (a, b) = tokio::join!(
            run(&sandbox, source, "first\n", limits(5000)),
            run(&sandbox, source, "second\n", limits(5000)),
        );

        assert_eq!(a.stdout, "first\nlocal\n");
        assert_eq!(b.stdout, "second\nlocal\n");
    }

    #[tokio::test]
    async fn scratch_directories_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path(), vec![sh()]);

        run(&sandbox, "touch file", "", limits(5000)).await;

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_entrypoint_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let broken = LanguageConfig::new("sh", "main.sh", ["/no/such/interpreter"]);
        let sandbox = sandbox(dir.path(), vec![broken]);

        let verdict = run(&sandbox, "echo", "", limits(5000)).await;

        assert_eq!(verdict.status, VerdictStatus::InternalError);
        assert!(verdict.stderr.is_empty());
    }

    #[test]
    fn reap_orphans_removes_stale_scratch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("stockade-stale")).unwrap();
        std::fs::create_dir(dir.path().join("unrelated")).unwrap();
        let sandbox = sandbox(dir.path(), vec![sh()]);
        assert_eq!(sandbox.config().scratch_root, dir.path());

        assert_eq!(sandbox.reap_orphans().unwrap(), 1);
        assert!(dir.path().join("unrelated").exists());
        assert!(!dir.path().join("stockade-stale").exists());
    }

    #[test]
    fn required_isolation_refuses_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::builder().scratch_root(dir.path()).build();
        let err = Sandbox::with_support(config, vec![sh()], IsolationSupport::default()).unwrap_err();
        assert!(matches!(err, StockadeError::IsolationUnavailable(_)));
    }
}
