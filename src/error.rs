//! Error types for the program build pipeline.
//!
//! Each external boundary (generation, synthesis, media tool, storage,
//! store) has its own error enum; the orchestrator wraps those into
//! `BuildError`, which is the taxonomy callers match on. Causes stay
//! attached as `source()` so nothing about the original failure is lost.

use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

/// Errors from the language generation service adapter.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation service returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("generation service returned an empty response")]
    Empty,

    #[error("malformed generation payload: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors from the speech synthesis service adapter.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("synthesis request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("synthesis service returned status {status}: {detail}")]
    Status {
        status: reqwest::StatusCode,
        detail: String,
    },

    #[error("synthesis returned no audio")]
    EmptyAudio,

    #[error("failed to write segment audio to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the media assembly tool (ffmpeg/ffprobe subprocesses).
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with status {status}: {stderr_tail}")]
    Failed {
        command: String,
        status: i32,
        stderr_tail: String,
    },

    #[error("{command} timed out after {timeout_ms}ms")]
    TimedOut { command: String, timeout_ms: u64 },

    #[error("could not parse duration probe output {output:?} for {path}")]
    BadProbe { path: PathBuf, output: String },

    #[error("output file {0} never stabilized")]
    UnstableOutput(PathBuf),

    #[error("media I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the article source client.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("article search request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("article source returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed article payload: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors from the object storage adapter.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage returned status {status} for {key}: {detail}")]
    Status {
        key: String,
        status: reqwest::StatusCode,
        detail: String,
    },

    #[error("could not read artifact for upload")]
    Io(#[from] std::io::Error),
}

/// Errors from the program store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("program already exists for {key} on {date}")]
    AlreadyExists { key: String, date: NaiveDate },

    #[error("program {0} not found")]
    ProgramNotFound(String),

    #[error("malformed record in {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cause side of `BuildError::AudioGeneration`: the pipeline reports one
/// audio error whether synthesis or assembly broke.
#[derive(Debug, Error)]
pub enum AudioCause {
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Media(#[from] MediaError),
}

/// The failure taxonomy one build exposes to callers.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("script generation failed")]
    ScriptGeneration(#[from] GenerationError),

    #[error("script validation failed: {0}")]
    ScriptValidation(String),

    #[error("audio generation failed")]
    AudioGeneration(#[source] AudioCause),

    #[error("artifact upload failed")]
    Upload(#[from] StorageError),

    #[error("program persistence failed")]
    Persistence(#[source] StoreError),

    #[error("only {found} new articles available, {required} required")]
    InsufficientArticles { found: usize, required: usize },

    #[error("a program already exists for {key} on {date}")]
    ProgramAlreadyExists { key: String, date: NaiveDate },

    #[error("article source not found: {0}")]
    ArticleSourceNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("article fetch failed")]
    ArticleFetch(#[from] SourceError),
}

impl From<SynthesisError> for BuildError {
    fn from(err: SynthesisError) -> Self {
        BuildError::AudioGeneration(AudioCause::Synthesis(err))
    }
}

impl From<MediaError> for BuildError {
    fn from(err: MediaError) -> Self {
        BuildError::AudioGeneration(AudioCause::Media(err))
    }
}

impl From<StoreError> for BuildError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists { key, date } => {
                BuildError::ProgramAlreadyExists { key, date }
            }
            other => BuildError::Persistence(other),
        }
    }
}

impl BuildError {
    /// Short reason string recorded on failed generation attempts.
    pub fn attempt_reason(&self) -> String {
        match self {
            BuildError::InsufficientArticles { found, required } => {
                format!("insufficient_articles ({found}/{required})")
            }
            BuildError::ProgramAlreadyExists { .. } => "already_exists".to_string(),
            BuildError::ScriptGeneration(_) => "script_generation".to_string(),
            BuildError::ScriptValidation(detail) => format!("script_validation: {detail}"),
            BuildError::AudioGeneration(_) => "audio_generation".to_string(),
            BuildError::Upload(_) => "upload".to_string(),
            BuildError::Persistence(_) => "persistence".to_string(),
            BuildError::ArticleSourceNotFound(name) => format!("source_not_found: {name}"),
            BuildError::UserNotFound(id) => format!("user_not_found: {id}"),
            BuildError::ArticleFetch(_) => "article_fetch".to_string(),
        }
    }
}

/// Render an error with its cause chain, for log lines and CLI output.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut cause = err.source();
    while let Some(err) = cause {
        out.push_str(": ");
        out.push_str(&err.to_string());
        cause = err.source();
    }
    out
}
