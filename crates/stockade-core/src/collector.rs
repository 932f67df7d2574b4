//! Classification of raw unit outcomes into verdicts

use crate::job::JobId;
use crate::pipe::Captured;
use crate::result::{KillReason, Phase, RawOutcome, Termination};
use crate::verdict::{LimitKind, Verdict, VerdictStatus};
use chrono::Utc;

/// Messages runtimes print when an allocation is refused
const ALLOCATION_FAILURES: &[&str] = &[
    "MemoryError",
    "std::bad_alloc",
    "OutOfMemoryError",
    "Cannot allocate memory",
    "cannot allocate",
    "out of memory",
    "Out of memory",
    "Out of space",
    "memory allocation of",
];

/// Map a raw outcome onto a verdict.
///
/// Checks run in a fixed order: internal failure, cancellation, time
/// limits, memory, compile failure, `SIGXCPU`, runtime failure, truncated
/// output. The first match decides the status.
#[must_use]
pub fn collect(job_id: JobId, outcome: &RawOutcome) -> Verdict {
    let (status, limit) = classify(outcome);

    if status == VerdictStatus::InternalError {
        tracing::error!(
            job_id = %job_id,
            phase = ?outcome.phase,
            error = outcome.error.as_deref().unwrap_or("unit ended without status"),
            "execution failed"
        );
        return Verdict::internal_error(job_id);
    }
    if status == VerdictStatus::Cancelled {
        tracing::info!(job_id = %job_id, "execution cancelled");
        return Verdict::cancelled(job_id);
    }

    let termination = outcome.termination;
    let verdict = Verdict {
        job_id,
        status,
        exit_code: termination.and_then(Termination::exit_code),
        signal: termination.and_then(Termination::signal),
        stdout: text(&outcome.stdout),
        stderr: text(&outcome.stderr),
        stdout_truncated: outcome.stdout.truncated,
        stderr_truncated: outcome.stderr.truncated,
        limit,
        duration_ms: millis(outcome.usage.wall),
        cpu_time_ms: millis(outcome.usage.cpu),
        memory_peak_bytes: outcome.usage.memory_peak,
        message: None,
        finished_at: Utc::now(),
    };

    tracing::debug!(
        job_id = %job_id,
        status = %verdict.status,
        exit_code = ?verdict.exit_code,
        signal = ?verdict.signal,
        duration_ms = verdict.duration_ms,
        cpu_time_ms = verdict.cpu_time_ms,
        memory_peak = verdict.memory_peak_bytes,
        "verdict collected"
    );

    verdict
}

fn classify(outcome: &RawOutcome) -> (VerdictStatus, Option<LimitKind>) {
    if outcome.error.is_some() {
        return (VerdictStatus::InternalError, None);
    }

    match outcome.killed {
        Some(KillReason::Cancelled) => return (VerdictStatus::Cancelled, None),
        Some(KillReason::WallClock) => return (VerdictStatus::Timeout, Some(LimitKind::WallClock)),
        Some(KillReason::CpuTime) => return (VerdictStatus::Timeout, Some(LimitKind::CpuTime)),
        Some(KillReason::Memory) | None => {}
    }

    let over_memory = outcome.memory_limit > 0 && outcome.usage.memory_peak > outcome.memory_limit;
    if outcome.killed == Some(KillReason::Memory) || outcome.oom_killed || over_memory {
        return (VerdictStatus::MemoryExceeded, Some(LimitKind::Memory));
    }

    let Some(termination) = outcome.termination else {
        return (VerdictStatus::InternalError, None);
    };

    if outcome.memory_backstop
        && !termination.is_success()
        && allocation_refused(outcome, termination)
    {
        return (VerdictStatus::MemoryExceeded, Some(LimitKind::Memory));
    }

    let compile_failed = match outcome.phase {
        Phase::Compile => !termination.is_success(),
        Phase::Run => {
            outcome.compile_error_code.is_some()
                && termination.exit_code() == outcome.compile_error_code
        }
    };
    if compile_failed {
        return (VerdictStatus::CompileError, None);
    }

    if termination.signal() == Some(libc::SIGXCPU) {
        return (VerdictStatus::Timeout, Some(LimitKind::CpuTime));
    }

    if !termination.is_success() {
        return (VerdictStatus::RuntimeError, None);
    }

    if outcome.stdout.truncated || outcome.stderr.truncated {
        return (VerdictStatus::OutputTruncated, Some(LimitKind::Output));
    }

    (VerdictStatus::Success, None)
}

/// Without a cgroup a refused allocation leaves two traces: the runtime's
/// own complaint on stderr, or a crash after the unit had grown to at least
/// half its ceiling.
fn allocation_refused(outcome: &RawOutcome, termination: Termination) -> bool {
    let crashed = matches!(
        termination.signal(),
        Some(libc::SIGSEGV | libc::SIGBUS | libc::SIGABRT)
    );
    if crashed && outcome.usage.memory_peak >= outcome.memory_limit / 2 {
        return true;
    }
    let stderr = String::from_utf8_lossy(&outcome.stderr.bytes);
    ALLOCATION_FAILURES.iter().any(|m| stderr.contains(m))
}

/// Decode captured output without growing it past its byte length: each
/// invalid sequence becomes a single `?`, and a sequence cut short by the
/// output cap is dropped.
fn text(captured: &Captured) -> String {
    let mut out = String::with_capacity(captured.bytes.len());
    let mut chunks = captured.bytes.utf8_chunks().peekable();
    while let Some(chunk) = chunks.next() {
        out.push_str(chunk.valid());
        let cut_short = captured.truncated && chunks.peek().is_none();
        if !chunk.invalid().is_empty() && !cut_short {
            out.push('?');
        }
    }
    out
}

#[allow(clippy::cast_possible_truncation)]
const fn millis(d: std::time::Duration) -> u64 {
    d.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Usage;
    use std::time::Duration;

    fn outcome(termination: Termination) -> RawOutcome {
        RawOutcome {
            phase: Phase::Run,
            termination: Some(termination),
            killed: None,
            oom_killed: false,
            stdout: Captured {
                bytes: b"out".to_vec(),
                truncated: false,
                total: 3,
            },
            stderr: Captured::default(),
            usage: Usage {
                wall: Duration::from_millis(120),
                cpu: Duration::from_millis(80),
                memory_peak: 4 * 1024 * 1024,
            },
            memory_limit: 64 * 1024 * 1024,
            memory_backstop: false,
            compile_error_code: Some(200),
            error: None,
        }
    }

    fn status_of(outcome: &RawOutcome) -> VerdictStatus {
        collect(JobId::new(), outcome).status
    }

    #[test]
    fn clean_exit_is_success() {
        let verdict = collect(JobId::new(), &outcome(Termination::Exited(0)));
        assert_eq!(verdict.status, VerdictStatus::Success);
        assert_eq!(verdict.stdout, "out");
        assert_eq!(verdict.exit_code, Some(0));
        assert_eq!(verdict.duration_ms, 120);
        assert_eq!(verdict.cpu_time_ms, 80);
        assert_eq!(verdict.memory_peak_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn timeout_wins_over_partial_output() {
        let mut raw = outcome(Termination::Signaled(libc::SIGKILL));
        raw.killed = Some(KillReason::WallClock);
        raw.stdout.truncated = true;
        let verdict = collect(JobId::new(), &raw);
        assert_eq!(verdict.status, VerdictStatus::Timeout);
        assert_eq!(verdict.limit, Some(LimitKind::WallClock));
        assert!(verdict.stdout_truncated);
    }

    #[test]
    fn cpu_limit_kill_and_sigxcpu_are_timeouts() {
        let mut raw = outcome(Termination::Signaled(libc::SIGKILL));
        raw.killed = Some(KillReason::CpuTime);
        assert_eq!(status_of(&raw), VerdictStatus::Timeout);

        let raw = outcome(Termination::Signaled(libc::SIGXCPU));
        let verdict = collect(JobId::new(), &raw);
        assert_eq!(verdict.status, VerdictStatus::Timeout);
        assert_eq!(verdict.limit, Some(LimitKind::CpuTime));
    }

    #[test]
    fn sigkill_disambiguated_by_oom_counter() {
        let mut raw = outcome(Termination::Exited(137));
        assert_eq!(status_of(&raw), VerdictStatus::RuntimeError);

        raw.oom_killed = true;
        let verdict = collect(JobId::new(), &raw);
        assert_eq!(verdict.status, VerdictStatus::MemoryExceeded);
        assert_eq!(verdict.signal, Some(libc::SIGKILL));
    }

    #[test]
    fn observed_peak_over_limit_is_memory_exceeded() {
        let mut raw = outcome(Termination::Signaled(libc::SIGSEGV));
        raw.usage.memory_peak = raw.memory_limit + 1;
        assert_eq!(status_of(&raw), VerdictStatus::MemoryExceeded);
    }

    #[test]
    fn compile_failures() {
        let mut raw = outcome(Termination::Exited(1));
        raw.phase = Phase::Compile;
        raw.stderr.bytes = b"error: expected ';'".to_vec();
        let verdict = collect(JobId::new(), &raw);
        assert_eq!(verdict.status, VerdictStatus::CompileError);
        assert!(verdict.stderr.contains("expected"));

        let raw = outcome(Termination::Exited(200));
        assert_eq!(status_of(&raw), VerdictStatus::CompileError);

        let mut raw = outcome(Termination::Exited(200));
        raw.compile_error_code = None;
        assert_eq!(status_of(&raw), VerdictStatus::RuntimeError);
    }

    #[test]
    fn runtime_error_keeps_truncation_flags() {
        let mut raw = outcome(Termination::Exited(3));
        raw.stdout.truncated = true;
        let verdict = collect(JobId::new(), &raw);
        assert_eq!(verdict.status, VerdictStatus::RuntimeError);
        assert!(verdict.stdout_truncated);
        assert_eq!(verdict.exit_code, Some(3));
    }

    #[test]
    fn truncated_output_on_success() {
        let mut raw = outcome(Termination::Exited(0));
        raw.stderr.truncated = true;
        let verdict = collect(JobId::new(), &raw);
        assert_eq!(verdict.status, VerdictStatus::OutputTruncated);
        assert_eq!(verdict.limit, Some(LimitKind::Output));
    }

    #[test]
    fn cancellation_and_internal_failure() {
        let mut raw = outcome(Termination::Signaled(libc::SIGKILL));
        raw.killed = Some(KillReason::Cancelled);
        assert_eq!(status_of(&raw), VerdictStatus::Cancelled);

        let raw = RawOutcome::failed(Phase::Run, "wait failed: EINTR");
        let verdict = collect(JobId::new(), &raw);
        assert_eq!(verdict.status, VerdictStatus::InternalError);
        assert!(!verdict.message.unwrap_or_default().contains("EINTR"));
    }

    #[test]
    fn refused_allocation_under_data_ceiling_is_memory_exceeded() {
        let mut raw = outcome(Termination::Exited(1));
        raw.stderr.bytes = b"Traceback (most recent call last):\nMemoryError\n".to_vec();
        assert_eq!(status_of(&raw), VerdictStatus::RuntimeError);

        raw.memory_backstop = true;
        let verdict = collect(JobId::new(), &raw);
        assert_eq!(verdict.status, VerdictStatus::MemoryExceeded);
        assert_eq!(verdict.limit, Some(LimitKind::Memory));

        let mut raw = outcome(Termination::Signaled(libc::SIGABRT));
        raw.memory_backstop = true;
        raw.stderr.bytes = b"terminate called after throwing an instance of 'std::bad_alloc'".to_vec();
        assert_eq!(status_of(&raw), VerdictStatus::MemoryExceeded);
    }

    #[test]
    fn data_ceiling_alone_does_not_reclassify_failures() {
        let mut raw = outcome(Termination::Exited(1));
        raw.memory_backstop = true;
        raw.stderr.bytes = b"ValueError: bad input".to_vec();
        assert_eq!(status_of(&raw), VerdictStatus::RuntimeError);

        let mut raw = outcome(Termination::Exited(0));
        raw.memory_backstop = true;
        raw.stderr.bytes = b"warning: out of memory, retrying".to_vec();
        assert_eq!(status_of(&raw), VerdictStatus::Success);

        // A small process crashing is a plain runtime error
        let mut raw = outcome(Termination::Signaled(libc::SIGSEGV));
        raw.memory_backstop = true;
        assert_eq!(status_of(&raw), VerdictStatus::RuntimeError);
    }

    #[test]
    fn crash_near_data_ceiling_is_memory_exceeded() {
        let mut raw = outcome(Termination::Signaled(libc::SIGSEGV));
        raw.memory_backstop = true;
        raw.usage.memory_peak = raw.memory_limit * 3 / 4;
        assert_eq!(status_of(&raw), VerdictStatus::MemoryExceeded);

        raw.memory_backstop = false;
        assert_eq!(status_of(&raw), VerdictStatus::RuntimeError);
    }

    #[test]
    fn truncated_output_drops_a_split_character() {
        let mut raw = outcome(Termination::Exited(0));
        raw.stdout = Captured {
            bytes: vec![0xC3, 0xA9, 0xC3],
            truncated: true,
            total: 4,
        };
        let verdict = collect(JobId::new(), &raw);
        assert_eq!(verdict.stdout, "\u{e9}");
        assert!(verdict.stdout.len() <= 3);

        raw.stdout.truncated = false;
        raw.stdout.bytes = vec![0xFF, 0xFE, b'a'];
        let verdict = collect(JobId::new(), &raw);
        assert_eq!(verdict.stdout, "??a");
        assert!(verdict.stdout.len() <= 3);
    }
}
