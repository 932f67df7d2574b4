//! # stockade-core
//!
//! Isolated, resource-bounded execution of untrusted programs.
//!
//! This crate provides the pieces the daemon composes:
//! - Jobs, resource limits and the verdicts they end in
//! - Linux isolation per execution unit (namespaces, cgroups v2, seccomp,
//!   Landlock, optional chroot into a language root filesystem)
//! - A resource limiter that attaches ceilings before exec and actively
//!   monitors wall clock, CPU time and memory
//! - The sandbox that runs a job's compile and run phases and the collector
//!   that classifies what happened

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod collector;
pub mod config;
pub mod error;
pub mod isolation;
pub mod job;
pub mod limits;
pub mod pipe;
pub mod protocol;
pub mod result;
pub mod sandbox;
pub mod unit;
pub mod verdict;

pub use config::{IsolationConfig, LanguageConfig, SandboxConfig, default_languages};
pub use error::StockadeError;
pub use job::{Job, JobId, LimitOverrides, Priority, ResourceLimits};
pub use sandbox::{Executor, Sandbox};
pub use verdict::{LimitKind, Verdict, VerdictStatus};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, StockadeError>;
