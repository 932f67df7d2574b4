//! Detection of the isolation facilities available on this host

use super::cgroups::CgroupRoot;
use crate::config::{IsolationConfig, SandboxConfig};
use crate::{Result, StockadeError};
use caps::{CapSet, Capability};
use serde::{Deserialize, Serialize};

/// What the running kernel and our privileges allow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationSupport {
    /// Running as uid 0, so an identity switch is possible
    pub root: bool,
    /// CAP_SYS_ADMIN held, so namespaces and mounts can be set up
    pub namespaces: bool,
    /// A delegated cgroup v2 subtree with memory, pids and cpu controllers
    pub cgroups_v2: bool,
    /// Seccomp filtering is available for this architecture
    pub seccomp: bool,
    /// Landlock ABI version, 0 when unsupported
    pub landlock_abi: i32,
}

impl IsolationSupport {
    /// Probe the host. Preparing the cgroup root creates it if missing.
    #[must_use]
    pub fn detect(config: &SandboxConfig) -> Self {
        let root = nix::unistd::geteuid().is_root();

        let namespaces = caps::has_cap(None, CapSet::Effective, Capability::CAP_SYS_ADMIN)
            .unwrap_or_else(|e| {
                tracing::debug!(error = %e, "capability query failed");
                false
            });

        let cgroups_v2 = config.isolation.cgroups
            && match CgroupRoot::prepare(&config.cgroup_root) {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!(error = %e, "cgroup v2 root unavailable");
                    false
                }
            };

        let seccomp = seccompiler::TargetArch::try_from(std::env::consts::ARCH).is_ok()
            && std::fs::read_to_string("/proc/self/status")
                .is_ok_and(|s| s.lines().any(|l| l.starts_with("Seccomp:")));

        let support = Self {
            root,
            namespaces,
            cgroups_v2,
            seccomp,
            landlock_abi: super::landlock::kernel_abi(),
        };

        tracing::info!(
            root = support.root,
            namespaces = support.namespaces,
            cgroups_v2 = support.cgroups_v2,
            seccomp = support.seccomp,
            landlock_abi = support.landlock_abi,
            "isolation probe complete"
        );

        support
    }

    /// Facilities that are both enabled and available
    #[must_use]
    pub const fn effective(&self, wanted: &IsolationConfig) -> IsolationConfig {
        IsolationConfig {
            namespaces: wanted.namespaces && self.namespaces,
            cgroups: wanted.cgroups && self.cgroups_v2,
            seccomp: wanted.seccomp && self.seccomp,
            landlock: wanted.landlock && self.landlock_abi > 0,
            allow_network: wanted.allow_network,
            required: wanted.required,
        }
    }

    /// Names of enabled facilities this host cannot provide
    #[must_use]
    pub fn missing(&self, wanted: &IsolationConfig) -> Vec<&'static str> {
        let effective = self.effective(wanted);
        [
            ("namespaces", wanted.namespaces, effective.namespaces),
            ("cgroups", wanted.cgroups, effective.cgroups),
            ("seccomp", wanted.seccomp, effective.seccomp),
            ("landlock", wanted.landlock, effective.landlock),
        ]
        .into_iter()
        .filter(|&(_, want, have)| want && !have)
        .map(|(name, _, _)| name)
        .collect()
    }

    /// Fail when isolation is required and an enabled facility is missing
    pub fn ensure_required(&self, wanted: &IsolationConfig) -> Result<()> {
        let missing = self.missing(wanted);
        if missing.is_empty() {
            return Ok(());
        }
        if wanted.required {
            return Err(StockadeError::IsolationUnavailable(missing.join(", ")));
        }
        tracing::warn!(missing = ?missing, "running with reduced isolation");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare() -> IsolationSupport {
        IsolationSupport::default()
    }

    #[test]
    fn effective_masks_unavailable_facilities() {
        let support = IsolationSupport {
            seccomp: true,
            landlock_abi: 3,
            ..bare()
        };
        let effective = support.effective(&IsolationConfig::default());
        assert!(effective.seccomp);
        assert!(effective.landlock);
        assert!(!effective.namespaces);
        assert!(!effective.cgroups);
    }

    #[test]
    fn required_isolation_fails_when_missing() {
        let err = bare().ensure_required(&IsolationConfig::default()).unwrap_err();
        match err {
            StockadeError::IsolationUnavailable(msg) => {
                assert!(msg.contains("namespaces"));
                assert!(msg.contains("cgroups"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn optional_isolation_only_warns() {
        let wanted = IsolationConfig {
            required: false,
            ..IsolationConfig::default()
        };
        assert!(bare().ensure_required(&wanted).is_ok());
        assert!(bare().ensure_required(&IsolationConfig::disabled()).is_ok());
    }

    #[test]
    fn detect_with_everything_disabled_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::SandboxConfig::unconfined(dir.path());
        let support = IsolationSupport::detect(&config);
        assert!(!support.cgroups_v2);
        assert!(support.missing(&config.isolation).is_empty());
    }
}
