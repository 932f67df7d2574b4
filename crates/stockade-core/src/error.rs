//! Error types for stockade-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StockadeError {
    #[error("namespace error: {0}")]
    Namespace(String),

    #[error("seccomp error: {0}")]
    Seccomp(String),

    #[error("landlock error: {0}")]
    Landlock(String),

    #[error("mount error: {0}")]
    Mount(String),

    #[error("cgroup error: {0}")]
    Cgroup(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("isolation unavailable: {0}")]
    IsolationUnavailable(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
