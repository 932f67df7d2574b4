//! Structured verdicts returned for every job

use crate::job::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a finished job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Success,
    RuntimeError,
    CompileError,
    Timeout,
    MemoryExceeded,
    OutputTruncated,
    InternalError,
    Cancelled,
}

impl VerdictStatus {
    /// Stable numeric code for this status
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::RuntimeError => 1,
            Self::CompileError => 2,
            Self::Timeout => 3,
            Self::MemoryExceeded => 4,
            Self::OutputTruncated => 5,
            Self::Cancelled => 6,
            Self::InternalError => 70,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RuntimeError => "runtime_error",
            Self::CompileError => "compile_error",
            Self::Timeout => "timeout",
            Self::MemoryExceeded => "memory_exceeded",
            Self::OutputTruncated => "output_truncated",
            Self::InternalError => "internal_error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The limit that ended or shaped a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    WallClock,
    CpuTime,
    Memory,
    Output,
}

/// Final result of one job. Produced exactly once and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub job_id: JobId,
    pub status: VerdictStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub limit: Option<LimitKind>,
    pub duration_ms: u64,
    pub cpu_time_ms: u64,
    pub memory_peak_bytes: u64,
    /// Generic explanation for statuses that carry no program output
    pub message: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl Verdict {
    /// A verdict with no output or accounting
    #[must_use]
    pub fn bare(job_id: JobId, status: VerdictStatus) -> Self {
        Self {
            job_id,
            status,
            exit_code: None,
            signal: None,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            limit: None,
            duration_ms: 0,
            cpu_time_ms: 0,
            memory_peak_bytes: 0,
            message: None,
            finished_at: Utc::now(),
        }
    }

    /// An internal failure. The message is deliberately generic.
    #[must_use]
    pub fn internal_error(job_id: JobId) -> Self {
        Self {
            message: Some("internal error while executing the job".into()),
            ..Self::bare(job_id, VerdictStatus::InternalError)
        }
    }

    /// A job cancelled before it produced a result
    #[must_use]
    pub fn cancelled(job_id: JobId) -> Self {
        Self {
            message: Some("job was cancelled".into()),
            ..Self::bare(job_id, VerdictStatus::Cancelled)
        }
    }

    /// A job whose unit was lost to a daemon crash
    #[must_use]
    pub fn interrupted(job_id: JobId) -> Self {
        Self {
            message: Some("job was interrupted by a daemon restart".into()),
            ..Self::bare(job_id, VerdictStatus::InternalError)
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == VerdictStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let all = [
            VerdictStatus::Success,
            VerdictStatus::RuntimeError,
            VerdictStatus::CompileError,
            VerdictStatus::Timeout,
            VerdictStatus::MemoryExceeded,
            VerdictStatus::OutputTruncated,
            VerdictStatus::InternalError,
            VerdictStatus::Cancelled,
        ];
        let mut codes: Vec<_> = all.iter().map(|s| s.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert_eq!(VerdictStatus::Success.exit_code(), 0);
        assert_eq!(VerdictStatus::InternalError.exit_code(), 70);
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let json = serde_json::to_value(VerdictStatus::MemoryExceeded).unwrap();
        assert_eq!(json, "memory_exceeded");
        assert_eq!(VerdictStatus::MemoryExceeded.to_string(), "memory_exceeded");
    }

    #[test]
    fn internal_error_is_generic() {
        let v = Verdict::internal_error(JobId::new());
        assert_eq!(v.status, VerdictStatus::InternalError);
        assert!(v.stdout.is_empty() && v.stderr.is_empty());
        assert!(v.message.is_some());
    }
}
