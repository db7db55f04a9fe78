// Common data models for the pipeline

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::Stage;

/// A page URL together with the content id derived from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSource {
    pub source_url: String,
    pub content_id: String,
}

/// Upstream video quality codes we accept, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoQuality {
    /// 1080p
    High,
    /// 720p
    Medium,
}

impl VideoQuality {
    pub const PREFERENCE: [VideoQuality; 2] = [VideoQuality::High, VideoQuality::Medium];

    pub fn code(self) -> i64 {
        match self {
            Self::High => 80,
            Self::Medium => 64,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::High => "1080P",
            Self::Medium => "720P",
        }
    }
}

/// Direct stream URLs produced by one resolve call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStreams {
    pub video_url: String,
    pub audio_url: String,
    pub video_quality: VideoQuality,
    pub audio_quality: i64,
}

/// Lifecycle shared by download tasks and merge jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Cancelled,
    Failed,
    Completed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed | Self::Completed)
    }
}

/// One streaming download, owned by the downloader call that created it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub source_url: String,
    pub destination: PathBuf,
    pub total_bytes: Option<u64>,
    pub bytes_transferred: u64,
    pub state: TaskState,
}

impl DownloadTask {
    pub fn new(source_url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            destination: destination.into(),
            total_bytes: None,
            bytes_transferred: 0,
            state: TaskState::Pending,
        }
    }

    /// Fraction in `0.0..=1.0`, when the size is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => Some((self.bytes_transferred as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }

    pub(crate) fn record(&mut self, written: usize) {
        debug_assert!(!self.state.is_terminal());
        self.bytes_transferred += written as u64;
    }
}

/// How the muxer combines the two elementary streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Repackage without re-encoding
    #[default]
    Copy,
    /// Re-encode to H.264 + AAC 48 kHz
    Transcode,
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Transcode => write!(f, "transcode"),
        }
    }
}

impl FromStr for MergeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "copy" => Ok(Self::Copy),
            "transcode" => Ok(Self::Transcode),
            other => Err(format!("unknown merge mode: {other} (expected copy or transcode)")),
        }
    }
}

/// One merge, owned by the muxer call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeJob {
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
    pub mode: MergeMode,
    pub state: TaskState,
}

impl MergeJob {
    pub fn new(
        video_path: impl Into<PathBuf>,
        audio_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        mode: MergeMode,
    ) -> Self {
        Self {
            video_path: video_path.into(),
            audio_path: audio_path.into(),
            output_path: output_path.into(),
            mode,
            state: TaskState::Pending,
        }
    }
}

/// Pipeline run states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Resolving,
    DownloadingVideo,
    DownloadingAudio,
    Merging,
    Done,
    Cancelled,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }

    /// Overall-progress band `(start, end)` covered by this state
    pub fn band(self) -> (u8, u8) {
        match self {
            Self::Idle | Self::Resolving => (0, 0),
            Self::DownloadingVideo => (0, 40),
            Self::DownloadingAudio => (40, 80),
            Self::Merging => (80, 100),
            Self::Done => (100, 100),
            Self::Cancelled | Self::Failed => (0, 0),
        }
    }
}

/// Events sent from a running pipeline to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineEvent {
    State { state: PipelineState },
    Progress { percent: u8 },
    Status { message: String },
    Error { stage: Option<Stage>, message: String },
    Done { output: PathBuf },
}

/// Network configuration for HTTP requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// HTTP or SOCKS5 proxy URL (e.g., "socks5://127.0.0.1:1080")
    pub proxy: Option<String>,

    /// Timeout in seconds
    pub timeout: Option<u32>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: Some(30),
        }
    }
}
