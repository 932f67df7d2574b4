//! Raw outcome of running an execution unit, before classification

use crate::pipe::Captured;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

/// Which command of a language produced the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Compile,
    Run,
}

/// Why the monitor killed a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    WallClock,
    CpuTime,
    Memory,
    Cancelled,
}

/// How the unit's leader process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
}

impl Termination {
    /// Exit codes above 128 from a shell-style entrypoint mean the program
    /// it ran died from signal `code - 128`.
    #[must_use]
    pub const fn signal(self) -> Option<i32> {
        match self {
            Self::Signaled(sig) => Some(sig),
            Self::Exited(code) if code > 128 && code < 128 + 65 => Some(code - 128),
            Self::Exited(_) => None,
        }
    }

    #[must_use]
    pub const fn exit_code(self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(code),
            Self::Signaled(_) => None,
        }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited(code),
            (None, Some(sig)) => Self::Signaled(sig),
            (None, None) => Self::Exited(-1),
        }
    }
}

/// Resources a unit consumed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub wall: Duration,
    pub cpu: Duration,
    pub memory_peak: u64,
}

/// Everything observed about one unit
#[derive(Debug, Clone)]
pub struct RawOutcome {
    pub phase: Phase,
    /// `None` when the unit could not be run or waited on
    pub termination: Option<Termination>,
    pub killed: Option<KillReason>,
    /// The cgroup's OOM killer fired
    pub oom_killed: bool,
    pub stdout: Captured,
    pub stderr: Captured,
    pub usage: Usage,
    /// Memory ceiling the unit ran under
    pub memory_limit: u64,
    /// The data segment rlimit stood in for a cgroup memory ceiling
    pub memory_backstop: bool,
    /// Exit code the entrypoint reserves for compile failures
    pub compile_error_code: Option<i32>,
    /// Internal failure; details stay in the logs
    pub error: Option<String>,
}

impl RawOutcome {
    /// Outcome for a unit that failed before or while being supervised
    #[must_use]
    pub fn failed(phase: Phase, error: impl Into<String>) -> Self {
        Self {
            phase,
            termination: None,
            killed: None,
            oom_killed: false,
            stdout: Captured::default(),
            stderr: Captured::default(),
            usage: Usage::default(),
            memory_limit: 0,
            memory_backstop: false,
            compile_error_code: None,
            error: Some(error.into()),
        }
    }

    /// The unit ran to completion with exit code 0 and was not killed
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
            && self.killed.is_none()
            && !self.oom_killed
            && self.termination.is_some_and(Termination::is_success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_signal_exit_codes() {
        assert_eq!(Termination::Exited(137).signal(), Some(9));
        assert_eq!(Termination::Exited(152).signal(), Some(24));
        assert_eq!(Termination::Exited(128).signal(), None);
        assert_eq!(Termination::Exited(1).signal(), None);
        assert_eq!(Termination::Exited(200).signal(), None);
        assert_eq!(Termination::Signaled(11).signal(), Some(11));
    }

    #[test]
    fn exit_status_conversion() {
        assert_eq!(
            Termination::from(ExitStatus::from_raw(3 << 8)),
            Termination::Exited(3)
        );
        assert_eq!(
            Termination::from(ExitStatus::from_raw(libc::SIGKILL)),
            Termination::Signaled(libc::SIGKILL)
        );
    }

    #[test]
    fn failed_outcome_is_not_success() {
        let outcome = RawOutcome::failed(Phase::Run, "spawn failed");
        assert!(!outcome.succeeded());
        assert!(outcome.termination.is_none());
    }
}
