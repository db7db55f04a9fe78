// Error types for the resolve / download / merge pipeline

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures while turning a page URL into direct stream URLs.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The page URL carries no content id after the `/video/` marker
    #[error("no content id found in URL: {0}")]
    ContentIdNotFound(String),

    /// Upstream answered but refused the request
    #[error("upstream API error (code={code}): {message}")]
    UpstreamApi { code: i64, message: String },

    /// No usable URL at any accepted quality tier
    #[error("no usable {0} stream found")]
    NoStreamFound(&'static str),

    #[error("upstream API returned HTTP {0}")]
    Status(StatusCode),

    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not parse upstream response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures while streaming a resource to disk.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("download failed: server returned HTTP {0}")]
    Status(StatusCode),

    #[error("download failed: i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download failed: connection closed after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },

    #[error("download failed: empty response body from {url}")]
    Empty { url: String },
}

impl DownloadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures while combining the elementary streams.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("invalid merge input {path}: {reason}")]
    InvalidInput { path: PathBuf, reason: &'static str },

    #[error("encoder not found: {tool}")]
    EncoderMissing { tool: String },

    #[error("encoder failed (code={code:?}): {stderr}")]
    EncoderFailed { code: Option<i32>, stderr: String },

    #[error("encoder reported success but {0} is missing or empty")]
    EmptyOutput(PathBuf),

    #[error("i/o error during merge: {0}")]
    Io(#[from] std::io::Error),
}

/// Which part of a pipeline run an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Workspace,
    Resolve,
    VideoDownload,
    AudioDownload,
    Merge,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Workspace => "workspace",
            Self::Resolve => "resolve",
            Self::VideoDownload => "video download",
            Self::AudioDownload => "audio download",
            Self::Merge => "merge",
        };
        f.write_str(label)
    }
}

/// Error surfaced by a pipeline run to the presentation layer.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("resolve stage failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("{stage} stage failed: {source}")]
    Download {
        stage: Stage,
        #[source]
        source: DownloadError,
    },

    #[error("merge stage failed: {0}")]
    Mux(#[from] MuxError),

    #[error("could not prepare temporary workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("HTTP client setup failed: {0}")]
    Client(#[source] reqwest::Error),

    /// User-initiated; not a failure
    #[error("cancelled by user")]
    Cancelled,

    /// The run task panicked or was torn down before reporting
    #[error("pipeline task aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Resolve(_) => Some(Stage::Resolve),
            Self::Download { stage, .. } => Some(*stage),
            Self::Mux(_) => Some(Stage::Merge),
            Self::Workspace(_) | Self::Client(_) => Some(Stage::Workspace),
            Self::Cancelled | Self::Aborted(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
