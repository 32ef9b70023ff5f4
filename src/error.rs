#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::bundle::Stage;

/// Errors found while validating the task graph, before anything runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlueprintError {
    #[error("Task '{0}' is registered more than once")]
    Duplicate(String),

    #[error("Task '{task}' depends on unknown task '{prerequisite}'")]
    UnknownPrerequisite { task: String, prerequisite: String },

    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),
}

/// Errors returned from executing a task graph.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Task '{0}' not found, run `help` to list the available tasks")]
    NotFound(String),

    #[error("Task '{0}' was requested again while it was still running")]
    Reentrant(String),

    #[error("Task '{0}':\n{1:#}")]
    Task(String, anyhow::Error),

    #[error("Process terminated with exit code {0}")]
    Terminated(u8),
}

/// A hard stop raised from inside a task action. The scheduler does not
/// treat it as an ordinary failure, it aborts the whole run and hands the
/// code to the process.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("terminate with exit code {0}")]
pub struct Termination(pub u8);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file {0}.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file {0}.\n{1}")]
    Parse(Utf8PathBuf, serde_json::Error),
}

/// Failure of a single bundle pipeline stage.
#[derive(Debug, Error)]
#[error("Stage {stage}: {source:#}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: anyhow::Error,
}

impl StageError {
    pub fn new(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Entry module {0} does not exist")]
    MissingEntry(Utf8PathBuf),

    #[error("Couldn't resolve '{specifier}' imported from {from}")]
    Unresolved {
        specifier: String,
        from: Utf8PathBuf,
    },

    #[error("Couldn't read module {0}.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Couldn't launch '{0}'.\n{1}")]
    Spawn(String, std::io::Error),

    #[error("'{0}' exited with {1}:\n{2}")]
    Status(String, std::process::ExitStatus, String),

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    SourceMap(#[from] SourceMapError),
}

#[derive(Debug, Error)]
pub enum SourceMapError {
    #[error("Invalid base64 VLQ character '{0}'")]
    InvalidBase64(char),

    #[error("Truncated VLQ value in mappings")]
    TruncatedVlq,

    #[error("Segment with {0} fields in mappings")]
    InvalidSegment(usize),

    #[error("VLQ value too large in mappings")]
    VlqOverflow,

    #[error("Mapping field out of range: {0}")]
    OutOfRange(i64),

    #[error("Mapping refers to missing source {0}")]
    SourceIndex(u32),

    #[error("Unsupported source map version {0}")]
    Version(u32),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
}

#[derive(Debug, Error)]
#[error("Couldn't compress {path}.\n{source}")]
pub struct CompressError {
    pub path: Utf8PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Error)]
pub enum LintError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),

    #[error(transparent)]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Linter produced no readable report.\n{0}")]
    Report(serde_json::Error),

    #[error("{errors} lint error(s), {warnings} warning(s)")]
    Findings { errors: usize, warnings: usize },
}

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Couldn't launch the test server.\n{0}")]
    Launch(std::io::Error),

    #[error("Lost track of the test server.\n{0}")]
    Wait(std::io::Error),

    #[error("Spec run failed with exit code {0:?}")]
    Failed(Option<i32>),
}

#[derive(Debug, Error)]
pub enum E2eError {
    #[error("Couldn't launch the end-to-end runner.\n{0}")]
    Launch(std::io::Error),

    #[error("Lost track of the end-to-end runner.\n{0}")]
    Wait(std::io::Error),

    #[error("End-to-end run failed with exit code {0:?}")]
    Failed(Option<i32>),
}

#[derive(Debug, Error, PartialEq)]
pub enum CoverageError {
    #[error("Coverage report has no summary line at index {0}")]
    MissingLine(usize),

    #[error("Summary line '{0}' has no percentage segment")]
    MissingSegment(String),

    #[error("'{0}' does not start with a number")]
    Percentage(String),
}

#[derive(Debug, Error)]
pub enum BadgeError {
    #[error("Couldn't read coverage report {0}.\n{1}")]
    Report(Utf8PathBuf, std::io::Error),

    #[error(transparent)]
    Coverage(#[from] CoverageError),

    #[error("Couldn't fetch badge from {0}.\n{1}")]
    Fetch(String, reqwest::Error),

    #[error("Badge service answered {1} for {0}")]
    Status(String, reqwest::StatusCode),

    #[error("Couldn't write badge to {0}.\n{1}")]
    Write(Utf8PathBuf, std::io::Error),

    #[error("Failed to build runtime")]
    Runtime(#[from] std::io::Error),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),
}
