//! Seccomp-BPF syscall filtering
//!
//! Units run under a deny-list: everything is allowed except syscalls that
//! would let a program leave its process group, reconfigure isolation,
//! inspect other processes or touch the kernel. Denied calls fail with
//! `EPERM` rather than killing the program, so runtimes that probe for
//! features keep working.

use crate::{Result, StockadeError};
use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};
use std::collections::BTreeMap;

/// Configuration for seccomp filtering
#[derive(Debug, Clone)]
pub struct SeccompConfig {
    /// Syscalls that always fail
    pub denied_syscalls: Vec<i64>,
    /// Deny `socket(AF_INET | AF_INET6, ...)`
    pub deny_inet_sockets: bool,
}

impl Default for SeccompConfig {
    fn default() -> Self {
        Self {
            denied_syscalls: default_denied_syscalls(),
            deny_inet_sockets: true,
        }
    }
}

impl SeccompConfig {
    #[must_use]
    pub fn for_unit(allow_network: bool) -> Self {
        Self {
            deny_inet_sockets: !allow_network,
            ..Self::default()
        }
    }

    /// Compile the filter for the running architecture. Done once in the
    /// parent; the program is installed in each child with [`install`].
    pub fn compile(&self) -> Result<BpfProgram> {
        let arch = TargetArch::try_from(std::env::consts::ARCH)
            .map_err(|e| StockadeError::Seccomp(format!("unsupported architecture: {e}")))?;

        let mut rules: BTreeMap<i64, Vec<SeccompRule>> = self
            .denied_syscalls
            .iter()
            .map(|&nr| (nr, Vec::new()))
            .collect();

        if self.deny_inet_sockets {
            let family_rule = |family: i32| -> Result<SeccompRule> {
                let cond = SeccompCondition::new(
                    0,
                    SeccompCmpArgLen::Dword,
                    SeccompCmpOp::Eq,
                    u64::from(family.unsigned_abs()),
                )
                .map_err(|e| StockadeError::Seccomp(e.to_string()))?;
                SeccompRule::new(vec![cond]).map_err(|e| StockadeError::Seccomp(e.to_string()))
            };
            rules.insert(
                libc::SYS_socket,
                vec![family_rule(libc::AF_INET)?, family_rule(libc::AF_INET6)?],
            );
        }

        tracing::debug!(
            denied = self.denied_syscalls.len(),
            inet = self.deny_inet_sockets,
            "compiling seccomp filter"
        );

        let filter = SeccompFilter::new(
            rules,
            SeccompAction::Allow,
            SeccompAction::Errno(libc::EPERM.unsigned_abs()),
            arch,
        )
        .map_err(|e| StockadeError::Seccomp(format!("invalid filter: {e}")))?;

        filter
            .try_into()
            .map_err(|e: seccompiler::BackendError| StockadeError::Seccomp(e.to_string()))
    }
}

/// Install a compiled filter on the calling process. Called in the forked
/// child as the last step before exec; sets `no_new_privs`.
pub fn install(program: &BpfProgram) -> std::io::Result<()> {
    seccompiler::apply_filter(program).map_err(std::io::Error::other)
}

/// Syscalls denied to executed code
fn default_denied_syscalls() -> Vec<i64> {
    vec![
        // leaving the unit's process group or namespaces
        libc::SYS_setsid,
        libc::SYS_setpgid,
        libc::SYS_unshare,
        libc::SYS_setns,
        // filesystem topology
        libc::SYS_mount,
        libc::SYS_umount2,
        libc::SYS_pivot_root,
        libc::SYS_chroot,
        // other processes and the kernel
        libc::SYS_ptrace,
        libc::SYS_process_vm_readv,
        libc::SYS_process_vm_writev,
        libc::SYS_kexec_load,
        libc::SYS_init_module,
        libc::SYS_finit_module,
        libc::SYS_delete_module,
        libc::SYS_reboot,
        libc::SYS_swapon,
        libc::SYS_swapoff,
        libc::SYS_bpf,
        libc::SYS_perf_event_open,
        libc::SYS_keyctl,
        libc::SYS_add_key,
        libc::SYS_request_key,
        libc::SYS_userfaultfd,
    ]
}
