//! Job scheduler and worker pool
//!
//! Submissions are admitted into a priority queue bounded by
//! `workers + queue_capacity`. A fixed set of worker tasks pull jobs and hand
//! them to the executor one at a time. Every admitted job ends with exactly
//! one verdict, which is retained for the retention window and then purged.

use crate::config::DaemonConfig;
use crate::error::SchedulerError;
use crate::journal::Journal;
use crate::queue::AdmissionQueue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stockade_core::protocol::{CancelOutcome, JournalRecord, PoolStatus, SubmitRequest};
use stockade_core::{
    Executor, Job, JobId, LanguageConfig, LimitOverrides, ResourceLimits, Verdict,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Where a job is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Completed(Verdict),
}

#[derive(Debug)]
enum Entry {
    Queued,
    Running(CancellationToken),
    Completed { verdict: Verdict, at: Instant },
}

#[derive(Debug)]
struct State {
    queue: AdmissionQueue,
    jobs: HashMap<JobId, Entry>,
    running: usize,
    /// Slots held by submissions whose journal record is being written
    reserved: usize,
    accepting: bool,
}

/// Submission rules and pool sizing taken from the daemon configuration
#[derive(Debug)]
struct Settings {
    workers: usize,
    queue_capacity: usize,
    retention: Duration,
    ceiling: ResourceLimits,
    max_source_bytes: usize,
    max_stdin_bytes: usize,
    languages: Vec<LanguageConfig>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    /// Signalled when a job is queued
    work: Notify,
    /// Signalled whenever a verdict is stored
    completed: Notify,
    /// Cancelled when admission stops; idle workers exit once the queue is empty
    stopping: CancellationToken,
    executor: Arc<dyn Executor>,
    journal: Option<Journal>,
    settings: Settings,
}

/// Bounded worker pool in front of an executor
#[derive(Debug)]
pub struct Scheduler {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn the workers and the retention reaper
    pub fn start(
        config: &DaemonConfig,
        executor: Arc<dyn Executor>,
        journal: Option<Journal>,
    ) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                queue: AdmissionQueue::new(),
                jobs: HashMap::new(),
                running: 0,
                reserved: 0,
                accepting: true,
            }),
            work: Notify::new(),
            completed: Notify::new(),
            stopping: CancellationToken::new(),
            executor,
            journal,
            settings: Settings {
                workers: config.workers,
                queue_capacity: config.queue_capacity,
                retention: config.retention(),
                ceiling: config.ceiling,
                max_source_bytes: config.max_source_bytes,
                max_stdin_bytes: config.max_stdin_bytes,
                languages: config.languages.clone(),
            },
        });

        let workers = (0..config.workers)
            .map(|worker_id| tokio::spawn(worker(Arc::clone(&inner), worker_id)))
            .collect();
        let reaper = tokio::spawn(reaper(Arc::clone(&inner)));

        tracing::info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "worker pool started"
        );

        Self {
            inner,
            workers: Mutex::new(workers),
            reaper: Mutex::new(Some(reaper)),
        }
    }

    /// Validate a submission and turn it into a job with resolved limits
    pub fn prepare(&self, req: SubmitRequest) -> Result<Job, SchedulerError> {
        let settings = &self.inner.settings;

        let lang = settings
            .languages
            .iter()
            .find(|l| l.matches(&req.language))
            .ok_or_else(|| SchedulerError::UnsupportedLanguage(req.language.clone()))?;

        if req.source.trim().is_empty() {
            return Err(SchedulerError::InvalidSubmission("source is empty".into()));
        }
        if req.source.len() > settings.max_source_bytes {
            return Err(SchedulerError::InvalidSubmission(format!(
                "source exceeds {} bytes",
                settings.max_source_bytes
            )));
        }
        if req.stdin.len() > settings.max_stdin_bytes {
            return Err(SchedulerError::InvalidSubmission(format!(
                "stdin exceeds {} bytes",
                settings.max_stdin_bytes
            )));
        }
        reject_zero_limits(&req.limits)?;

        let limits = ResourceLimits::resolve(&lang.limits, &req.limits, &settings.ceiling);
        Ok(Job::new(lang.name.clone(), req.source, req.stdin, limits).with_priority(req.priority))
    }

    /// Admit a job. The job is journaled before it becomes visible.
    pub fn submit(&self, job: Job) -> Result<JobId, SchedulerError> {
        let id = job.id;
        let capacity = self.capacity();

        {
            let mut state = self.inner.state.lock();
            if !state.accepting {
                return Err(SchedulerError::ShuttingDown);
            }
            if state.queue.len() + state.running + state.reserved >= capacity {
                tracing::warn!(job_id = %id, capacity, "admission rejected, queue full");
                return Err(SchedulerError::QueueFull);
            }
            state.reserved += 1;
        }

        let journaled = self
            .inner
            .journal
            .as_ref()
            .map_or(Ok(()), |journal| journal.record_accepted(&job));

        let mut state = self.inner.state.lock();
        state.reserved -= 1;
        journaled?;
        if !state.accepting {
            drop(state);
            self.inner.forget(id);
            return Err(SchedulerError::ShuttingDown);
        }

        tracing::info!(
            job_id = %id,
            language = %job.language,
            priority = ?job.priority,
            "job accepted"
        );
        state.jobs.insert(id, Entry::Queued);
        state.queue.push(job);
        drop(state);

        self.inner.work.notify_one();
        Ok(id)
    }

    /// Current state of a job, or `None` when unknown or expired
    #[must_use]
    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        let state = self.inner.state.lock();
        state.jobs.get(&id).map(|entry| match entry {
            Entry::Queued => JobStatus::Queued,
            Entry::Running(_) => JobStatus::Running,
            Entry::Completed { verdict, .. } => JobStatus::Completed(verdict.clone()),
        })
    }

    /// Best-effort cancellation
    pub fn cancel(&self, id: JobId) -> Result<CancelOutcome, SchedulerError> {
        let mut state = self.inner.state.lock();
        let outcome = match state.jobs.get(&id) {
            None => return Err(SchedulerError::NotFound),
            Some(Entry::Completed { .. }) => CancelOutcome::AlreadyCompleted,
            Some(Entry::Running(token)) => {
                token.cancel();
                CancelOutcome::Signalled
            }
            Some(Entry::Queued) => CancelOutcome::Dequeued,
        };

        let dequeued = if outcome == CancelOutcome::Dequeued {
            state.queue.remove(id)
        } else {
            None
        };
        drop(state);
        if let Some(job) = dequeued {
            self.inner.finish_unrun(&job, Verdict::cancelled(id));
        }

        tracing::info!(job_id = %id, ?outcome, "cancel requested");
        Ok(outcome)
    }

    /// Wait until a job has a verdict. `None` when the job is unknown.
    pub async fn wait_for(&self, id: JobId) -> Option<Verdict> {
        loop {
            let notified = self.inner.completed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let JobStatus::Completed(verdict) = self.status(id)? {
                return Some(verdict);
            }
            notified.await;
        }
    }

    #[must_use]
    pub fn pool_status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            workers: self.inner.settings.workers,
            busy: state.running,
            queued: state.queue.len(),
            retained: state
                .jobs
                .values()
                .filter(|e| matches!(e, Entry::Completed { .. }))
                .count(),
            accepting: state.accepting,
        }
    }

    #[must_use]
    pub fn languages(&self) -> &[LanguageConfig] {
        &self.inner.settings.languages
    }

    fn capacity(&self) -> usize {
        self.inner.settings.workers + self.inner.settings.queue_capacity
    }

    /// Restore journaled jobs after a restart. Jobs that never got a verdict
    /// were interrupted by the crash and complete as internal errors.
    pub fn recover(&self, records: Vec<JournalRecord>) -> usize {
        let mut interrupted = 0;

        for JournalRecord { job, verdict } in records {
            let verdict = verdict.unwrap_or_else(|| {
                interrupted += 1;
                tracing::warn!(job_id = %job.id, "job interrupted by restart");
                let verdict = Verdict::interrupted(job.id);
                self.inner.journal_verdict(&job, &verdict);
                verdict
            });
            self.inner.state.lock().jobs.insert(
                job.id,
                Entry::Completed {
                    verdict,
                    at: Instant::now(),
                },
            );
        }

        if interrupted > 0 {
            self.inner.completed.notify_waiters();
        }
        interrupted
    }

    /// Drop verdicts older than the retention window
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Stop admission, let workers drain the queue and finish running jobs,
    /// then cancel whatever is left once `grace` expires.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.state.lock().accepting = false;
        self.inner.stopping.cancel();
        tracing::info!(?grace, "draining worker pool");

        let handles = std::mem::take(&mut *self.workers.lock());
        let joined = futures::future::join_all(handles);
        tokio::pin!(joined);

        if tokio::time::timeout(grace, joined.as_mut()).await.is_err() {
            tracing::warn!("grace period expired, cancelling remaining jobs");
            self.inner.cancel_all();
            joined.await;
        }

        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
        tracing::info!("worker pool stopped");
    }
}

fn reject_zero_limits(limits: &LimitOverrides) -> Result<(), SchedulerError> {
    let fields = [
        ("cpu_time_ms", limits.cpu_time_ms),
        ("memory_bytes", limits.memory_bytes),
        ("wall_clock_ms", limits.wall_clock_ms),
        ("output_bytes", limits.output_bytes),
    ];
    match fields.iter().find(|(_, v)| *v == Some(0)) {
        Some((name, _)) => Err(SchedulerError::InvalidSubmission(format!(
            "limit {name} must be positive"
        ))),
        None => Ok(()),
    }
}

impl Inner {
    /// Take the next job and mark it running
    fn dispatch(&self) -> Option<(Job, CancellationToken)> {
        let mut state = self.state.lock();
        let job = state.queue.pop()?;
        let token = CancellationToken::new();
        state.running += 1;
        state.jobs.insert(job.id, Entry::Running(token.clone()));
        Some((job, token))
    }

    fn is_drained(&self) -> bool {
        let state = self.state.lock();
        !state.accepting && state.queue.is_empty()
    }

    /// Store the verdict of a job that ran
    fn finish(&self, job: &Job, verdict: Verdict) {
        self.journal_verdict(job, &verdict);
        {
            let mut state = self.state.lock();
            state.running -= 1;
            state.jobs.insert(
                job.id,
                Entry::Completed {
                    verdict,
                    at: Instant::now(),
                },
            );
        }
        self.completed.notify_waiters();
    }

    /// Store the verdict of a job that left the queue without running
    fn finish_unrun(&self, job: &Job, verdict: Verdict) {
        self.journal_verdict(job, &verdict);
        self.state.lock().jobs.insert(
            job.id,
            Entry::Completed {
                verdict,
                at: Instant::now(),
            },
        );
        self.completed.notify_waiters();
    }

    fn journal_verdict(&self, job: &Job, verdict: &Verdict) {
        let Some(journal) = &self.journal else {
            return;
        };
        if let Err(e) = journal.record_verdict(job, verdict) {
            tracing::error!(job_id = %job.id, error = %e, "failed to journal verdict");
        }
    }

    fn forget(&self, id: JobId) {
        let Some(journal) = &self.journal else {
            return;
        };
        if let Err(e) = journal.remove(id) {
            tracing::warn!(job_id = %id, error = %e, "failed to remove journal record");
        }
    }

    /// Cancel queued jobs and signal every running one
    fn cancel_all(&self) {
        let (queued, running) = {
            let mut state = self.state.lock();
            let queued = state.queue.drain();
            let running: Vec<_> = state
                .jobs
                .values()
                .filter_map(|e| match e {
                    Entry::Running(token) => Some(token.clone()),
                    _ => None,
                })
                .collect();
            (queued, running)
        };

        for job in &queued {
            self.finish_unrun(job, Verdict::cancelled(job.id));
        }
        for token in &running {
            token.cancel();
        }
        tracing::info!(queued = queued.len(), running = running.len(), "cancelled remaining jobs");
    }

    fn purge_expired(&self) -> usize {
        let retention = self.settings.retention;
        let expired: Vec<JobId> = {
            let mut state = self.state.lock();
            let expired: Vec<_> = state
                .jobs
                .iter()
                .filter_map(|(id, e)| match e {
                    Entry::Completed { at, .. } if at.elapsed() >= retention => Some(*id),
                    _ => None,
                })
                .collect();
            for id in &expired {
                state.jobs.remove(id);
            }
            expired
        };

        for id in &expired {
            self.forget(*id);
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "purged expired verdicts");
        }
        expired.len()
    }
}

async fn worker(inner: Arc<Inner>, worker_id: usize) {
    tracing::debug!(worker_id, "worker started");

    loop {
        if let Some((job, cancel)) = inner.dispatch() {
            run_job(&inner, worker_id, job, cancel).await;
            continue;
        }
        if inner.is_drained() {
            break;
        }
        tokio::select! {
            () = inner.work.notified() => {}
            () = inner.stopping.cancelled() => {}
        }
    }

    tracing::debug!(worker_id, "worker exiting");
}

async fn run_job(inner: &Arc<Inner>, worker_id: usize, job: Job, cancel: CancellationToken) {
    let job = Arc::new(job);
    tracing::info!(job_id = %job.id, worker_id, "job dispatched");

    // The executor runs in its own task so a panic surfaces as a JoinError
    let task = {
        let executor = Arc::clone(&inner.executor);
        let job = Arc::clone(&job);
        tokio::spawn(async move { executor.execute(&job, cancel).await })
    };

    let verdict = match task.await {
        Ok(verdict) => verdict,
        Err(e) => {
            tracing::error!(job_id = %job.id, worker_id, error = %e, "execution task failed");
            Verdict::internal_error(job.id)
        }
    };

    tracing::info!(
        job_id = %job.id,
        worker_id,
        status = %verdict.status,
        duration_ms = verdict.duration_ms,
        "job completed"
    );
    inner.finish(&job, verdict);
}

async fn reaper(inner: Arc<Inner>) {
    let period = (inner.settings.retention / 2)
        .clamp(Duration::from_millis(100), Duration::from_secs(60));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        inner.purge_expired();
    }
}
