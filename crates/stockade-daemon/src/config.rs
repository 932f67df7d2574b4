//! Daemon configuration
//!
//! Loaded in layers: built-in defaults, an optional YAML file, `STOCKADE_*`
//! environment overrides, then command-line flags. The result is validated
//! before anything starts.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stockade_core::{
    LanguageConfig, ResourceLimits, Result, SandboxConfig, StockadeError, default_languages,
};

/// Command-line flags. Every flag overrides the file and the environment.
#[derive(Debug, Default, Parser)]
#[command(name = "stockade-daemon")]
#[command(author, version, about = "Sandboxed execution orchestrator")]
pub struct CliArgs {
    /// YAML configuration file
    #[arg(short, long, env = "STOCKADE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address the HTTP API listens on
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Number of parallel workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Jobs that may wait beyond the ones running
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Directory for per-job scratch directories
    #[arg(long)]
    pub scratch_root: Option<PathBuf>,

    /// Directory for the job journal
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Start even when some isolation facilities are unavailable
    #[arg(long)]
    pub allow_reduced_isolation: bool,
}

/// Configuration for the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Address the HTTP API listens on
    pub listen: SocketAddr,

    /// Number of workers in the pool
    pub workers: usize,

    /// Admission capacity beyond the running jobs
    pub queue_capacity: usize,

    /// Directory holding the job journal
    pub state_dir: PathBuf,

    /// How long completed verdicts stay retrievable, in seconds
    pub retention_secs: u64,

    /// How long shutdown waits for running jobs before cancelling them, in seconds
    pub shutdown_grace_secs: u64,

    /// Largest accepted source, in bytes
    pub max_source_bytes: usize,

    /// Largest accepted stdin payload, in bytes
    pub max_stdin_bytes: usize,

    /// Highest limits a submission may request
    pub ceiling: ResourceLimits,

    /// Sandbox configuration shared by every unit
    pub sandbox: SandboxConfig,

    /// Supported language runtimes
    pub languages: Vec<LanguageConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            workers: 4,
            queue_capacity: 64,
            state_dir: PathBuf::from("/var/lib/stockade/state"),
            retention_secs: 3600,
            shutdown_grace_secs: 30,
            max_source_bytes: 100 * 1024,
            max_stdin_bytes: 1024 * 1024,
            ceiling: ResourceLimits {
                max_cpu_time: Duration::from_secs(30),
                max_memory: 512 * 1024 * 1024, // 512MB
                max_wall_clock: Duration::from_secs(30),
                max_output_bytes: 1024 * 1024,
            },
            sandbox: SandboxConfig::default(),
            languages: default_languages(),
        }
    }
}

impl DaemonConfig {
    /// Build the effective configuration from every layer
    pub fn load(cli: &CliArgs) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StockadeError::Config(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string. Missing fields keep their defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| StockadeError::Config(format!("failed to parse YAML config: {e}")))
    }

    /// Apply `STOCKADE_*` overrides read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            value
                .parse()
                .map_err(|e| StockadeError::Config(format!("invalid {key}={value}: {e}")))
        }

        if let Some(v) = lookup("STOCKADE_LISTEN") {
            self.listen = parse("STOCKADE_LISTEN", &v)?;
        }
        if let Some(v) = lookup("STOCKADE_WORKERS") {
            self.workers = parse("STOCKADE_WORKERS", &v)?;
        }
        if let Some(v) = lookup("STOCKADE_QUEUE_CAPACITY") {
            self.queue_capacity = parse("STOCKADE_QUEUE_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("STOCKADE_SCRATCH_ROOT") {
            self.sandbox.scratch_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("STOCKADE_STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("STOCKADE_OUTPUT_CAP") {
            self.ceiling.max_output_bytes = parse("STOCKADE_OUTPUT_CAP", &v)?;
        }
        Ok(())
    }

    /// Apply command-line flags
    pub fn apply_cli(&mut self, cli: &CliArgs) {
        if let Some(listen) = cli.listen {
            self.listen = listen;
        }
        if let Some(workers) = cli.workers {
            self.workers = workers;
        }
        if let Some(capacity) = cli.queue_capacity {
            self.queue_capacity = capacity;
        }
        if let Some(root) = &cli.scratch_root {
            self.sandbox.scratch_root.clone_from(root);
        }
        if let Some(dir) = &cli.state_dir {
            self.state_dir.clone_from(dir);
        }
        if cli.allow_reduced_isolation {
            self.sandbox.isolation.required = false;
        }
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(StockadeError::Config(msg));

        if self.workers == 0 {
            return invalid("workers must be at least 1".into());
        }
        if self.max_source_bytes == 0 {
            return invalid("max_source_bytes must be positive".into());
        }
        if self.ceiling.max_wall_clock.is_zero() || self.ceiling.max_cpu_time.is_zero() {
            return invalid("time ceilings must be positive".into());
        }
        if self.ceiling.max_memory == 0 {
            return invalid("memory ceiling must be positive".into());
        }
        if self.sandbox.check_interval.is_zero() {
            return invalid("sandbox.check_interval must be positive".into());
        }
        if self.languages.is_empty() {
            return invalid("at least one language must be configured".into());
        }

        for (i, lang) in self.languages.iter().enumerate() {
            if lang.run.is_empty() {
                return invalid(format!("language {} has an empty run command", lang.name));
            }
            if lang.compile.as_ref().is_some_and(Vec::is_empty) {
                return invalid(format!("language {} has an empty compile command", lang.name));
            }
            if lang.source_file.is_empty() || lang.source_file.contains('/') {
                return invalid(format!(
                    "language {} needs a plain source file name",
                    lang.name
                ));
            }
            let clash = self.languages[..i].iter().find(|other| {
                other.matches(&lang.name) || lang.aliases.iter().any(|a| other.matches(a))
            });
            if let Some(other) = clash {
                return invalid(format!(
                    "language {} overlaps with {}",
                    lang.name, other.name
                ));
            }
        }

        Ok(())
    }

    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
