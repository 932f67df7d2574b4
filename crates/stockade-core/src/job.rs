//! Jobs and the resource limits attached to them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Admission priority class. Higher classes are dispatched first, FIFO within a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Self; 3] = [Self::High, Self::Normal, Self::Low];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// Ceilings enforced on a single execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time across every process of the unit
    #[serde(rename = "cpu_time_ms", with = "duration_ms")]
    pub max_cpu_time: Duration,

    /// Memory in bytes
    #[serde(rename = "memory_bytes")]
    pub max_memory: u64,

    /// Wall-clock time from spawn to exit
    #[serde(rename = "wall_clock_ms", with = "duration_ms")]
    pub max_wall_clock: Duration,

    /// Bytes kept per output stream
    #[serde(rename = "output_bytes")]
    pub max_output_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_cpu_time: Duration::from_secs(10),
            max_memory: 256 * 1024 * 1024, // 256MB
            max_wall_clock: Duration::from_secs(10),
            max_output_bytes: 64 * 1024,
        }
    }
}

impl ResourceLimits {
    /// Fill unset fields from `defaults`, then clamp everything to `ceiling`.
    #[must_use]
    pub fn resolve(defaults: &Self, requested: &LimitOverrides, ceiling: &Self) -> Self {
        let pick_duration = |ms: Option<u64>, default: Duration, max: Duration| {
            ms.map_or(default, Duration::from_millis).min(max)
        };

        Self {
            max_cpu_time: pick_duration(
                requested.cpu_time_ms,
                defaults.max_cpu_time,
                ceiling.max_cpu_time,
            ),
            max_memory: requested
                .memory_bytes
                .unwrap_or(defaults.max_memory)
                .min(ceiling.max_memory),
            max_wall_clock: pick_duration(
                requested.wall_clock_ms,
                defaults.max_wall_clock,
                ceiling.max_wall_clock,
            ),
            max_output_bytes: requested
                .output_bytes
                .unwrap_or(defaults.max_output_bytes)
                .min(ceiling.max_output_bytes),
        }
    }

    #[must_use]
    pub const fn memory_mb(&self) -> u64 {
        self.max_memory / (1024 * 1024)
    }
}

/// Limits requested by a submitter. Every field is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOverrides {
    pub cpu_time_ms: Option<u64>,
    pub memory_bytes: Option<u64>,
    pub wall_clock_ms: Option<u64>,
    pub output_bytes: Option<u64>,
}

/// A unit of work: one program to run once. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub language: String,
    pub source: Vec<u8>,
    pub stdin: Vec<u8>,
    pub limits: ResourceLimits,
    pub priority: Priority,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        language: impl Into<String>,
        source: impl Into<Vec<u8>>,
        stdin: impl Into<Vec<u8>>,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            id: JobId::new(),
            language: language.into(),
            source: source.into(),
            stdin: stdin.into(),
            limits,
            priority: Priority::Normal,
            submitted_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
