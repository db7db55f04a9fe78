// Pipeline orchestrator: resolve -> video -> audio -> merge

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::chunked::ChunkedDownloader;
use super::config::PipelineConfig;
use super::errors::{PipelineError, Stage};
use super::models::{MergeJob, MergeMode, PipelineEvent, PipelineState, TaskState};
use super::muxer::Muxer;
use super::resolver::StreamResolver;
use super::traits::ProgressEmitter;
use super::utils;
use super::workspace::TempWorkspace;

/// Runs the whole download-and-merge pipeline. One `Pipeline` can serve
/// any number of concurrent runs; each run gets its own workspace.
pub struct Pipeline {
    resolver: StreamResolver,
    downloader: ChunkedDownloader,
    muxer: Muxer,
    merge_mode: MergeMode,
    workspace_root: PathBuf,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let client = utils::build_client(config).map_err(PipelineError::Client)?;
        Ok(Self {
            resolver: StreamResolver::new(client.clone(), config),
            downloader: ChunkedDownloader::from_config(client, config),
            muxer: Muxer::from_config(config),
            merge_mode: config.merge_mode,
            workspace_root: config.effective_workspace_root(),
        })
    }

    pub fn muxer(&self) -> &Muxer {
        &self.muxer
    }

    /// Start a run in the background and return its handle
    pub fn start(
        self: &Arc<Self>,
        source_url: impl Into<String>,
        output: impl Into<PathBuf>,
    ) -> PipelineHandle {
        let source_url = source_url.into();
        let output = output.into();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(PipelineState::Idle);
        let cancel = CancellationToken::new();

        let pipeline = Arc::clone(self);
        let run_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let run = Run {
                emitter: ProgressEmitter::new(events_tx),
                state: state_tx,
                cancel: run_cancel,
            };
            pipeline.execute(&run, &source_url, &output).await
        });

        PipelineHandle {
            events,
            state,
            cancel,
            task,
        }
    }

    async fn execute(
        &self,
        run: &Run,
        source_url: &str,
        output: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let result = match TempWorkspace::create(&self.workspace_root) {
            Ok(workspace) => {
                let result = self.stages(run, &workspace, source_url, output).await;
                if let Err(e) = workspace.close() {
                    tracing::warn!("[pipeline] could not remove workspace: {}", e);
                }
                result
            }
            Err(e) => Err(PipelineError::Workspace(e)),
        };

        match &result {
            Ok(path) => {
                run.enter(PipelineState::Done);
                run.emitter.percent(100);
                run.emitter.status("done");
                run.emitter.emit(PipelineEvent::Done {
                    output: path.clone(),
                });
                tracing::info!("[pipeline] done: {}", path.display());
            }
            Err(PipelineError::Cancelled) => {
                run.enter(PipelineState::Cancelled);
                run.emitter.status("cancelled");
                tracing::info!("[pipeline] cancelled");
            }
            Err(err) => {
                run.enter(PipelineState::Failed);
                run.emitter.emit(PipelineEvent::Error {
                    stage: err.stage(),
                    message: err.to_string(),
                });
                tracing::error!("[pipeline] {}", err);
            }
        }
        result
    }

    async fn stages(
        &self,
        run: &Run,
        workspace: &TempWorkspace,
        source_url: &str,
        output: &Path,
    ) -> Result<PathBuf, PipelineError> {
        run.enter(PipelineState::Resolving);
        run.emitter.status("resolving stream URLs");
        let streams = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => return Err(PipelineError::Cancelled),
            streams = self.resolver.resolve(source_url) => streams?,
        };
        run.emitter.status(format!(
            "found {} video and audio {}",
            streams.video_quality.label(),
            streams.audio_quality
        ));

        let stages = [
            (
                PipelineState::DownloadingVideo,
                Stage::VideoDownload,
                "downloading video",
                &streams.video_url,
                workspace.video_path(),
            ),
            (
                PipelineState::DownloadingAudio,
                Stage::AudioDownload,
                "downloading audio",
                &streams.audio_url,
                workspace.audio_path(),
            ),
        ];
        for (state, stage, label, url, destination) in stages {
            run.enter(state);
            let (start, end) = state.band();
            let sink = run.emitter.band(start, end, label);
            let task = self
                .downloader
                .download(url, &destination, &sink, &run.cancel)
                .await
                .map_err(|source| PipelineError::Download { stage, source })?;
            if task.state == TaskState::Cancelled {
                return Err(PipelineError::Cancelled);
            }
        }

        run.enter(PipelineState::Merging);
        let (start, end) = PipelineState::Merging.band();
        let sink = run.emitter.band(start, end, "merging");
        let job = MergeJob::new(
            workspace.video_path(),
            workspace.audio_path(),
            output,
            self.merge_mode,
        );
        let job = self
            .muxer
            .merge(job, &sink, &run.cancel, Some(workspace))
            .await?;
        if job.state == TaskState::Cancelled {
            return Err(PipelineError::Cancelled);
        }

        Ok(job.output_path)
    }
}

/// Per-run plumbing shared by the stages
struct Run {
    emitter: ProgressEmitter,
    state: watch::Sender<PipelineState>,
    cancel: CancellationToken,
}

impl Run {
    fn enter(&self, state: PipelineState) {
        tracing::debug!("[pipeline] -> {:?}", state);
        self.state.send_replace(state);
        self.emitter.emit(PipelineEvent::State { state });
    }
}

/// Caller side of a running pipeline
pub struct PipelineHandle {
    events: mpsc::UnboundedReceiver<PipelineEvent>,
    state: watch::Receiver<PipelineState>,
    cancel: CancellationToken,
    task: JoinHandle<Result<PathBuf, PipelineError>>,
}

impl PipelineHandle {
    /// Request cancellation; the run ends once the active stage has stopped
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Watch for state changes without consuming events
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }

    /// Next event, or `None` once the run has finished and the queue is drained
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<PipelineEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the run to end and return the output path
    pub async fn wait(self) -> Result<PathBuf, PipelineError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Aborted(e.to_string())),
        }
    }
}
