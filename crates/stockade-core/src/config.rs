//! Sandbox and language runtime configuration

use crate::job::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Exit code a language entrypoint uses to report a failed compilation
pub const DEFAULT_COMPILE_ERROR_CODE: i32 = 200;

/// Configuration shared by every execution unit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Directory under which per-job scratch directories are created
    pub scratch_root: PathBuf,

    /// cgroup v2 directory under which per-unit cgroups are created
    pub cgroup_root: PathBuf,

    /// Which isolation facilities to use
    pub isolation: IsolationConfig,

    /// Unprivileged identity for executed code (applied only when started as root)
    pub run_as: Option<Identity>,

    /// Paths readable (and executable) by executed code when Landlock is active
    pub ro_paths: Vec<PathBuf>,

    /// Paths writable by executed code besides its scratch directory
    pub rw_paths: Vec<PathBuf>,

    /// Base environment for executed code
    pub env: Vec<(String, String)>,

    /// How often the monitor samples a running unit
    #[serde(with = "crate::job::duration_ms")]
    pub check_interval: Duration,

    /// Largest file a unit may write (RLIMIT_FSIZE)
    pub max_file_bytes: u64,

    /// Maximum number of processes/threads per unit
    pub max_pids: u32,

    /// Maximum number of open file descriptors per process
    pub max_open_files: u64,

    /// Limits applied to the compile phase of compiled languages
    pub compile_limits: ResourceLimits,

    /// How long to wait for output pipes to close once a unit is gone
    #[serde(with = "crate::job::duration_ms")]
    pub drain_timeout: Duration,
}

/// Isolation facilities. A disabled facility is never attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// New network, IPC, UTS and mount namespaces per unit
    pub namespaces: bool,
    /// Per-unit cgroup v2 with memory, pids and cpu controllers
    pub cgroups: bool,
    /// Syscall deny-list
    pub seccomp: bool,
    /// Landlock filesystem confinement
    pub landlock: bool,
    /// Allow network access from executed code
    pub allow_network: bool,
    /// Refuse to start when an enabled facility is unavailable
    pub required: bool,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            namespaces: true,
            cgroups: true,
            seccomp: true,
            landlock: true,
            allow_network: false,
            required: true,
        }
    }
}

impl IsolationConfig {
    /// Every facility off. Units still get their own process group, rlimits,
    /// scratch directory and the active monitor.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            namespaces: false,
            cgroups: false,
            seccomp: false,
            landlock: false,
            allow_network: false,
            required: false,
        }
    }
}

/// Numeric user and group executed code runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    /// `nobody:nogroup`
    #[must_use]
    pub const fn nobody() -> Self {
        Self {
            uid: 65534,
            gid: 65534,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            scratch_root: PathBuf::from("/var/lib/stockade/scratch"),
            cgroup_root: PathBuf::from("/sys/fs/cgroup/stockade"),
            isolation: IsolationConfig::default(),
            run_as: Some(Identity::nobody()),
            ro_paths: vec![
                PathBuf::from("/usr"),
                PathBuf::from("/lib"),
                PathBuf::from("/lib64"),
                PathBuf::from("/bin"),
                PathBuf::from("/etc"),
                PathBuf::from("/opt"),
                PathBuf::from("/proc"),
                PathBuf::from("/dev"),
            ],
            rw_paths: vec![PathBuf::from("/dev/null")],
            env: vec![
                ("PATH".into(), "/usr/local/bin:/usr/bin:/bin".into()),
                ("LANG".into(), "C.UTF-8".into()),
            ],
            check_interval: Duration::from_millis(10),
            max_file_bytes: 16 * 1024 * 1024, // 16MB
            max_pids: 64,
            max_open_files: 256,
            compile_limits: ResourceLimits {
                max_cpu_time: Duration::from_secs(30),
                max_memory: 1024 * 1024 * 1024, // 1GB
                max_wall_clock: Duration::from_secs(30),
                max_output_bytes: 64 * 1024,
            },
            drain_timeout: Duration::from_secs(2),
        }
    }
}

impl SandboxConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Configuration for hosts without privileges: no isolation facilities
    /// and no identity switch.
    #[must_use]
    pub fn unconfined(scratch_root: impl Into<PathBuf>) -> Self {
        Self::builder()
            .scratch_root(scratch_root)
            .isolation(IsolationConfig::disabled())
            .run_as(None)
            .build()
    }
}

/// Builder for `SandboxConfig`
#[derive(Debug, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    #[must_use]
    pub fn scratch_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = path.into();
        self
    }

    #[must_use]
    pub fn cgroup_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cgroup_root = path.into();
        self
    }

    #[must_use]
    pub const fn isolation(mut self, isolation: IsolationConfig) -> Self {
        self.config.isolation = isolation;
        self
    }

    #[must_use]
    pub const fn allow_network(mut self, allow: bool) -> Self {
        self.config.isolation.allow_network = allow;
        self
    }

    #[must_use]
    pub const fn run_as(mut self, identity: Option<Identity>) -> Self {
        self.config.run_as = identity;
        self
    }

    #[must_use]
    pub fn ro_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ro_paths.push(path.into());
        self
    }

    #[must_use]
    pub fn rw_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.rw_paths.push(path.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub const fn check_interval(mut self, interval: Duration) -> Self {
        self.config.check_interval = interval;
        self
    }

    #[must_use]
    pub const fn max_pids(mut self, pids: u32) -> Self {
        self.config.max_pids = pids;
        self
    }

    #[must_use]
    pub const fn compile_limits(mut self, limits: ResourceLimits) -> Self {
        self.config.compile_limits = limits;
        self
    }

    #[must_use]
    pub fn build(self) -> SandboxConfig {
        self.config
    }
}

/// A language runtime: the prebuilt environment and fixed entrypoint that
/// compiles and runs one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Language tag used in submissions
    pub name: String,

    /// Other tags accepted for this language
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Root filesystem to chroot into (requires namespaces)
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// File name the source is written to inside the scratch directory
    pub source_file: String,

    /// Compile command, run before the entrypoint in its own unit
    #[serde(default)]
    pub compile: Option<Vec<String>>,

    /// Fixed entrypoint
    pub run: Vec<String>,

    /// Exit code with which the entrypoint reports a compile failure
    #[serde(default = "default_compile_error_code")]
    pub compile_error_code: Option<i32>,

    /// Extra environment for this language
    #[serde(default)]
    pub env: Vec<(String, String)>,

    /// Limits used when a submission leaves them unset
    #[serde(default)]
    pub limits: ResourceLimits,
}

#[allow(clippy::unnecessary_wraps)]
const fn default_compile_error_code() -> Option<i32> {
    Some(DEFAULT_COMPILE_ERROR_CODE)
}

impl LanguageConfig {
    /// An interpreted language whose entrypoint is `run`
    pub fn new<I, S>(name: impl Into<String>, source_file: impl Into<String>, run: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            root: None,
            source_file: source_file.into(),
            compile: None,
            run: run.into_iter().map(Into::into).collect(),
            compile_error_code: default_compile_error_code(),
            env: Vec::new(),
            limits: ResourceLimits::default(),
        }
    }

    #[must_use]
    pub fn compile<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compile = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    #[must_use]
    pub const fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Whether `tag` names this language
    #[must_use]
    pub fn matches(&self, tag: &str) -> bool {
        self.name.eq_ignore_ascii_case(tag) || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(tag))
    }
}

fn limits(wall_secs: u64, memory_mb: u64) -> ResourceLimits {
    ResourceLimits {
        max_cpu_time: Duration::from_secs(wall_secs),
        max_memory: memory_mb * 1024 * 1024,
        max_wall_clock: Duration::from_secs(wall_secs),
        ..ResourceLimits::default()
    }
}

/// Built-in language table
#[must_use]
pub fn default_languages() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig::new("python", "solution.py", ["python3", "solution.py"])
            .alias("python3")
            .limits(limits(10, 128)),
        LanguageConfig::new("javascript", "solution.js", ["node", "solution.js"])
            .alias("nodejs")
            .alias("node")
            .limits(limits(10, 128)),
        LanguageConfig::new("cpp", "solution.cpp", ["./solution"])
            .alias("c++")
            .compile(["g++", "-O2", "-std=c++17", "-o", "solution", "solution.cpp"])
            .limits(limits(15, 256)),
        LanguageConfig::new("java", "Main.java", ["java", "Main"])
            .compile(["javac", "Main.java"])
            .limits(limits(20, 512)),
        LanguageConfig::new("go", "solution.go", ["./solution"])
            .alias("golang")
            .compile(["go", "build", "-o", "solution", "solution.go"])
            .limits(limits(10, 128)),
        LanguageConfig::new("rust", "solution.rs", ["./solution"])
            .compile(["rustc", "-O", "-o", "solution", "solution.rs"])
            .limits(limits(15, 256)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfined_disables_every_facility() {
        let config = SandboxConfig::unconfined("/tmp/scratch");
        assert_eq!(config.isolation, IsolationConfig::disabled());
        assert!(config.run_as.is_none());
        assert_eq!(config.scratch_root, PathBuf::from("/tmp/scratch"));
    }

    #[test]
    fn builder_sets_every_field() {
        let compile = ResourceLimits {
            max_memory: 2 * 1024 * 1024 * 1024,
            ..ResourceLimits::default()
        };
        let config = SandboxConfig::builder()
            .scratch_root("/srv/scratch")
            .cgroup_root("/sys/fs/cgroup/judge")
            .isolation(IsolationConfig::disabled())
            .allow_network(true)
            .run_as(Some(Identity {
                uid: 65534,
                gid: 65534,
            }))
            .ro_path("/opt/runtimes")
            .rw_path("/dev/shm")
            .env("LANG", "C.UTF-8")
            .check_interval(Duration::from_millis(25))
            .max_pids(16)
            .compile_limits(compile)
            .build();

        assert_eq!(config.scratch_root, PathBuf::from("/srv/scratch"));
        assert_eq!(config.cgroup_root, PathBuf::from("/sys/fs/cgroup/judge"));
        assert!(config.isolation.allow_network);
        assert!(!config.isolation.namespaces);
        assert_eq!(config.run_as.map(|id| id.uid), Some(65534));
        assert!(config.ro_paths.contains(&PathBuf::from("/opt/runtimes")));
        assert!(config.rw_paths.contains(&PathBuf::from("/dev/shm")));
        assert!(config.env.contains(&("LANG".to_string(), "C.UTF-8".to_string())));
        assert_eq!(config.check_interval, Duration::from_millis(25));
        assert_eq!(config.max_pids, 16);
        assert_eq!(config.compile_limits, compile);
    }

    #[test]
    fn language_matches_name_and_aliases() {
        let langs = default_languages();
        let js = langs.iter().find(|l| l.name == "javascript").unwrap();
        assert!(js.matches("nodejs"));
        assert!(js.matches("JavaScript"));
        assert!(!js.matches("python"));
    }

    #[test]
    fn compiled_languages_have_compile_step() {
        for lang in default_languages() {
            let compiled = matches!(lang.name.as_str(), "cpp" | "java" | "go" | "rust");
            assert_eq!(lang.compile.is_some(), compiled, "{}", lang.name);
            assert!(!lang.run.is_empty());
        }
    }

    #[test]
    fn language_config_from_json_uses_defaults() {
        let lang: LanguageConfig = serde_json::from_value(serde_json::json!({
            "name": "sh",
            "source_file": "main.sh",
            "run": ["/bin/sh", "main.sh"]
        }))
        .unwrap();
        assert_eq!(lang.compile_error_code, Some(DEFAULT_COMPILE_ERROR_CODE));
        assert_eq!(lang.limits, ResourceLimits::default());
        assert!(lang.compile.is_none());
    }
}
