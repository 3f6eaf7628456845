//! Crate-wide error types.

use thiserror::Error;

pub type SearchResult<T> = Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("predicate error: {0}")]
    Predicate(String),

    #[error("could not spawn debugger: {0}")]
    SpawnFailed(String),

    #[error("did not receive the debugger prompt; got:\n{0}")]
    NoPrompt(String),

    #[error("could not set breakpoint at program entry; got:\n{0}")]
    EntryBreakpointFailed(String),

    #[error("could not read target pid; answer started with:\n{0}")]
    PidUnparseable(String),

    #[error("debugger protocol error: {0}")]
    Protocol(String),

    #[error("metric probe unavailable: {0}")]
    ProbeUnavailable(String),

    #[error("report error: {0}")]
    Report(String),
}
