// bilitv-downloader library: the pipeline behind the CLI

pub mod downloader;

pub use downloader::{
    ChunkedDownloader, MergeMode, Muxer, Pipeline, PipelineConfig, PipelineError, PipelineEvent,
    PipelineHandle, PipelineState, StreamResolver,
};
