//! Linux isolation primitives
//!
//! This module contains the isolation mechanisms applied to every execution unit:
//! - `namespace` - Linux namespaces (mount, net, ipc, uts) entered with unshare
//! - `cgroups` - per-unit cgroup v2 with memory, pids and cpu limits
//! - `seccomp` - syscall deny-list
//! - `landlock` - filesystem access control
//! - `mounts` - chroot into a language root filesystem
//! - `probe` - detection of what the host supports

pub mod cgroups;
pub mod landlock;
pub mod mounts;
pub mod namespace;
pub mod probe;
pub mod seccomp;

pub use self::cgroups::{CgroupHandle, CgroupLimits, CgroupRoot};
pub use self::landlock::LandlockConfig;
pub use self::mounts::MountPlan;
pub use self::namespace::NamespaceConfig;
pub use self::probe::IsolationSupport;
pub use self::seccomp::SeccompConfig;
