// Downloader module - resolve, download and merge pipeline

pub mod backends;
pub mod chunked;
pub mod config;
pub mod errors;
pub mod format_selector;
pub mod models;
pub mod muxer;
pub mod orchestrator;
pub mod resolver;
pub mod tools;
pub mod traits;
pub mod utils;
pub mod workspace;

#[cfg(test)]
mod test_support;

pub use chunked::ChunkedDownloader;
pub use config::PipelineConfig;
pub use errors::{DownloadError, MuxError, PipelineError, ResolveError, Stage};
pub use models::{
    DownloadTask, MergeJob, MergeMode, PipelineEvent, PipelineState, ResolvedStreams, TaskState,
};
pub use muxer::Muxer;
pub use orchestrator::{Pipeline, PipelineHandle};
pub use resolver::StreamResolver;
pub use traits::{ProgressEmitter, ProgressSink};
