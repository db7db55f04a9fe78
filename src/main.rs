// bilitv-downloader - command line front end for the download pipeline

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use bilitv_downloader_lib::downloader::models::{MergeJob, TaskState};
use bilitv_downloader_lib::downloader::tools::ToolManager;
use bilitv_downloader_lib::downloader::utils;
use bilitv_downloader_lib::{
    ChunkedDownloader, MergeMode, Muxer, Pipeline, PipelineConfig, PipelineError, PipelineEvent,
    StreamResolver,
};

/// Exit status used when the user interrupts a run
const EXIT_CANCELLED: u8 = 130;

/// Download a bilibili.tv video as one playable file
#[derive(Parser)]
#[command(name = "bilitv-downloader")]
#[command(version)]
#[command(long_about = "bilitv-downloader - fetch separate video/audio streams and mux them\n\n\
    Whole pipeline:      bilitv-downloader fetch <url> movie.mp4\n\
    Show stream URLs:    bilitv-downloader resolve <url>\n\
    Single download:     bilitv-downloader download <stream-url> out.bin\n\
    Merge local files:   bilitv-downloader merge video.mp4 audio.m4s out.mp4\n\
    Check the encoder:   bilitv-downloader tools")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: <config dir>/bilitv-downloader/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Encoder program to use instead of the discovered one
    #[arg(long, global = true, value_name = "PROGRAM")]
    encoder: Option<String>,

    /// HTTP or SOCKS5 proxy URL
    #[arg(long, global = true, value_name = "URL")]
    proxy: Option<String>,

    /// Quiet mode: warnings and errors only
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve, download both streams and merge them into OUTPUT
    Fetch {
        url: String,
        output: PathBuf,

        /// copy (default) or transcode
        #[arg(long, value_name = "MODE")]
        mode: Option<MergeMode>,

        /// Directory for the per-run scratch space
        #[arg(long, value_name = "DIR")]
        workspace: Option<PathBuf>,
    },

    /// Print the direct stream URLs for a page URL
    Resolve { url: String },

    /// Stream one URL to a local file
    Download { url: String, dest: PathBuf },

    /// Merge a local video and audio file
    Merge {
        video: PathBuf,
        audio: PathBuf,
        output: PathBuf,

        /// copy (default) or transcode
        #[arg(long, value_name = "MODE")]
        mode: Option<MergeMode>,
    },

    /// Show which encoder would be used
    Tools,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if is_cancelled(&err) => {
            eprintln!("Cancelled.");
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(quiet: bool, verbose: bool) {
    let level = if verbose {
        Level::DEBUG
    } else if quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<PipelineError>()
        .is_some_and(PipelineError::is_cancelled)
}

async fn run(cli: Cli) -> Result<()> {
    let config = PipelineConfig::load(cli.config.as_deref())?
        .with_encoder(cli.encoder)
        .with_proxy(cli.proxy);

    match cli.command {
        Commands::Fetch {
            url,
            output,
            mode,
            workspace,
        } => {
            let mut config = config.with_workspace_root(workspace);
            if let Some(mode) = mode {
                config = config.with_merge_mode(mode);
            }
            fetch(&config, url, output).await
        }
        Commands::Resolve { url } => resolve(&config, &url).await,
        Commands::Download { url, dest } => download(&config, &url, &dest).await,
        Commands::Merge {
            video,
            audio,
            output,
            mode,
        } => merge(&config, video, audio, output, mode.unwrap_or(config.merge_mode)).await,
        Commands::Tools => tools(&config).await,
    }
}

async fn fetch(config: &PipelineConfig, url: String, output: PathBuf) -> Result<()> {
    let pipeline = Arc::new(Pipeline::new(config)?);
    let mut handle = pipeline.start(url, output);
    cancel_on_ctrl_c(handle.cancel_token());

    let pb = progress_bar(100)?;
    while let Some(event) = handle.next_event().await {
        match event {
            PipelineEvent::Progress { percent } => pb.set_position(u64::from(percent)),
            PipelineEvent::Status { message } => pb.set_message(message),
            PipelineEvent::State { .. } | PipelineEvent::Error { .. } => {}
            PipelineEvent::Done { output } => {
                pb.finish_with_message(format!("saved {}", output.display()));
            }
        }
    }
    if !pb.is_finished() {
        pb.abandon();
    }

    let output = handle.wait().await?;
    println!("{}", output.display());
    Ok(())
}

async fn resolve(config: &PipelineConfig, url: &str) -> Result<()> {
    let client = utils::build_client(config).context("could not set up HTTP client")?;
    let streams = StreamResolver::new(client, config).resolve(url).await?;
    println!(
        "video ({}, qn={}): {}",
        streams.video_quality.label(),
        streams.video_quality.code(),
        streams.video_url
    );
    println!("audio ({}): {}", streams.audio_quality, streams.audio_url);
    Ok(())
}

async fn download(config: &PipelineConfig, url: &str, dest: &Path) -> Result<()> {
    let client = utils::build_client(config).context("could not set up HTTP client")?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let sink = BarSink(progress_bar(100)?);
    let task = ChunkedDownloader::from_config(client, config)
        .download(url, dest, &sink, &cancel)
        .await?;

    if task.state == TaskState::Cancelled {
        sink.0.abandon_with_message(format!(
            "stopped after {} bytes, partial file kept",
            task.bytes_transferred
        ));
        return Err(PipelineError::Cancelled.into());
    }
    sink.0
        .finish_with_message(format!("{} bytes -> {}", task.bytes_transferred, dest.display()));
    Ok(())
}

async fn merge(
    config: &PipelineConfig,
    video: PathBuf,
    audio: PathBuf,
    output: PathBuf,
    mode: MergeMode,
) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let sink = BarSink(progress_bar(100)?);
    sink.0.set_message(format!("merging ({mode})"));
    let job = MergeJob::new(video, audio, output, mode);
    // User files: no workspace, so the inputs are left alone
    let job = Muxer::from_config(config)
        .merge(job, &sink, &cancel, None)
        .await?;

    if job.state == TaskState::Cancelled {
        sink.0.abandon();
        return Err(PipelineError::Cancelled.into());
    }
    sink.0
        .finish_with_message(format!("saved {}", job.output_path.display()));
    Ok(())
}

async fn tools(config: &PipelineConfig) -> Result<()> {
    let info = ToolManager::new(config.encoder.as_deref())
        .encoder_info()
        .await;
    match (&info.path, info.is_available) {
        (Some(path), true) => println!(
            "{}: {} ({})",
            info.name,
            path.display(),
            info.version.as_deref().unwrap_or("unknown version")
        ),
        _ => println!("{}: not found (install it or pass --encoder)", info.name),
    }
    Ok(())
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("[cli] interrupt received, cancelling");
            cancel.cancel();
        }
    });
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% | {msg}")?
            .progress_chars("█▓░"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// Shows one component's progress on a terminal bar
struct BarSink(ProgressBar);

impl bilitv_downloader_lib::downloader::ProgressSink for BarSink {
    fn progress(&self, fraction: f64) {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).floor() as u64;
        if percent > self.0.position() {
            self.0.set_position(percent);
        }
    }

    fn status(&self, message: &str) {
        self.0.set_message(message.to_string());
    }
}
