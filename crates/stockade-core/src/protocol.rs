//! Wire types for the orchestration API and the job journal
//!
//! JSON is used over HTTP; journal records are encoded as msgpack.

use crate::config::LanguageConfig;
use crate::isolation::IsolationSupport;
use crate::job::{JobId, LimitOverrides, Priority, ResourceLimits};
use crate::verdict::Verdict;
use serde::{Deserialize, Serialize};

/// Body of `POST /jobs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub language: String,
    pub source: String,
    #[serde(default)]
    pub stdin: String,
    #[serde(default)]
    pub limits: LimitOverrides,
    #[serde(default)]
    pub priority: Priority,
}

/// Response to an accepted submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// Lifecycle state of a job that has no verdict yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingState {
    Queued,
    Running,
}

/// Body of `GET /jobs/{id}` while the job is still pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingResponse {
    pub job_id: JobId,
    pub status: PendingState,
}

/// What a cancellation request did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Removed from the queue before it ran
    Dequeued,
    /// Running unit signalled to stop
    Signalled,
    /// Already had a verdict; nothing changed
    AlreadyCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    pub outcome: CancelOutcome,
}

/// One entry of `GET /languages`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    pub aliases: Vec<String>,
    pub compiled: bool,
    pub default_limits: ResourceLimits,
}

impl From<&LanguageConfig> for LanguageInfo {
    fn from(lang: &LanguageConfig) -> Self {
        Self {
            name: lang.name.clone(),
            aliases: lang.aliases.clone(),
            compiled: lang.compile.is_some(),
            default_limits: lang.limits,
        }
    }
}

/// Worker pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub workers: usize,
    pub busy: usize,
    pub queued: usize,
    pub retained: usize,
    pub accepting: bool,
}

/// Body of `GET /health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub pool: PoolStatus,
    pub isolation: IsolationSupport,
}

/// Error body returned by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A journaled job: written when it is accepted and rewritten with its verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub job: crate::job::Job,
    pub verdict: Option<Verdict>,
}

/// Encode a message to msgpack, with field names
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(msg)
}

/// Decode a message from msgpack
pub fn decode<'a, T: Deserialize<'a>>(data: &'a [u8]) -> Result<T, rmp_serde::decode::Error> {
    rmp_serde::from_slice(data)
}
