//! Linux namespace isolation

use nix::sched::CloneFlags;

/// Configuration for namespace isolation
///
/// Namespaces are entered with `unshare` from the unit's pre-exec hook, so
/// the executed program itself lives in them. A new PID namespace would only
/// apply to the program's children and is therefore not offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Create new mount namespace
    pub mount: bool,
    /// Create new network namespace (loopback only, down)
    pub net: bool,
    /// Create new IPC namespace
    pub ipc: bool,
    /// Create new UTS namespace
    pub uts: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            mount: true,
            net: true,
            ipc: true,
            uts: true,
        }
    }
}

impl NamespaceConfig {
    /// Namespaces for a unit; the network namespace is skipped when network access is allowed
    #[must_use]
    pub fn for_unit(allow_network: bool) -> Self {
        Self {
            net: !allow_network,
            ..Self::default()
        }
    }

    /// Convert to nix CloneFlags
    #[must_use]
    pub fn to_clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();

        if self.mount {
            flags |= CloneFlags::CLONE_NEWNS;
        }
        if self.net {
            flags |= CloneFlags::CLONE_NEWNET;
        }
        if self.ipc {
            flags |= CloneFlags::CLONE_NEWIPC;
        }
        if self.uts {
            flags |= CloneFlags::CLONE_NEWUTS;
        }

        flags
    }

    /// Enter new namespaces using unshare. Called in the forked child.
    pub fn enter(&self) -> std::io::Result<()> {
        let flags = self.to_clone_flags();
        if flags.is_empty() {
            return Ok(());
        }
        nix::sched::unshare(flags).map_err(std::io::Error::from)
    }
}
