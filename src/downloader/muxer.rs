// Muxer - combine one video and one audio file with the external encoder

use std::io;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use super::backends::backend_for;
use super::config::PipelineConfig;
use super::errors::MuxError;
use super::models::{MergeJob, TaskState};
use super::tools::ToolManager;
use super::traits::ProgressSink;
use super::utils::ProcessOutcome;
use super::workspace::TempWorkspace;

/// Lines of encoder stderr kept in `EncoderFailed`
const STDERR_TAIL_LINES: usize = 20;

pub struct Muxer {
    tools: ToolManager,
}

impl Muxer {
    /// Muxer that always runs `encoder`
    pub fn new(encoder: impl Into<PathBuf>) -> Self {
        Self {
            tools: ToolManager::with_path(encoder),
        }
    }

    /// The encoder is looked up when a merge starts, not here
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            tools: ToolManager::new(config.encoder.as_deref()),
        }
    }

    pub async fn encoder_path(&self) -> PathBuf {
        self.tools.encoder_path().await
    }

    /// Run `job`. On success the output exists and is non-empty; on failure
    /// or cancellation `job.output_path` is left as it was.
    ///
    /// With a `workspace`, its intermediate files are removed afterwards
    /// whatever the outcome.
    pub async fn merge(
        &self,
        job: MergeJob,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
        workspace: Option<&TempWorkspace>,
    ) -> Result<MergeJob, MuxError> {
        let result = self.run_job(job, sink, cancel).await;
        if let Some(workspace) = workspace {
            workspace.remove_artifacts().await;
        }
        result
    }

    async fn run_job(
        &self,
        mut job: MergeJob,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<MergeJob, MuxError> {
        validate_input(&job.video_path).await?;
        validate_input(&job.audio_path).await?;

        if cancel.is_cancelled() {
            job.state = TaskState::Cancelled;
            return Ok(job);
        }

        if let Some(parent) = job.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = staging_path(&job.output_path);

        let encoder = self.tools.encoder_path().await;
        let backend = backend_for(job.mode);
        job.state = TaskState::Running;
        tracing::info!(
            "[muxer] {} + {} -> {} ({} via {})",
            job.video_path.display(),
            job.audio_path.display(),
            job.output_path.display(),
            backend.name(),
            encoder.display()
        );

        let outcome = backend
            .run(&encoder, &job.video_path, &job.audio_path, &staging, sink, cancel)
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                job.state = TaskState::Failed;
                return Err(MuxError::EncoderMissing {
                    tool: encoder.display().to_string(),
                });
            }
            Err(e) => {
                job.state = TaskState::Failed;
                discard(&staging).await;
                return Err(MuxError::Io(e));
            }
        };

        match outcome {
            ProcessOutcome::Cancelled => {
                job.state = TaskState::Cancelled;
                discard(&staging).await;
                tracing::info!("[muxer] cancelled, encoder killed");
                Ok(job)
            }
            ProcessOutcome::Exited { status, stderr } if !status.success() => {
                job.state = TaskState::Failed;
                discard(&staging).await;
                tracing::warn!("[muxer] encoder exited with {}", status);
                Err(MuxError::EncoderFailed {
                    code: status.code(),
                    stderr: tail(&stderr, STDERR_TAIL_LINES),
                })
            }
            ProcessOutcome::Exited { .. } => {
                let produced = tokio::fs::metadata(&staging)
                    .await
                    .map(|m| m.is_file() && m.len() > 0)
                    .unwrap_or(false);
                if !produced {
                    job.state = TaskState::Failed;
                    discard(&staging).await;
                    return Err(MuxError::EmptyOutput(job.output_path.clone()));
                }

                if let Err(e) = promote(&staging, &job.output_path).await {
                    job.state = TaskState::Failed;
                    discard(&staging).await;
                    return Err(MuxError::Io(e));
                }

                job.state = TaskState::Completed;
                sink.progress(1.0);
                tracing::info!("[muxer] wrote {}", job.output_path.display());
                Ok(job)
            }
        }
    }
}

async fn validate_input(path: &Path) -> Result<(), MuxError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| MuxError::InvalidInput {
            path: path.to_path_buf(),
            reason: "file does not exist",
        })?;
    if !meta.is_file() {
        return Err(MuxError::InvalidInput {
            path: path.to_path_buf(),
            reason: "not a regular file",
        });
    }
    if meta.len() == 0 {
        return Err(MuxError::InvalidInput {
            path: path.to_path_buf(),
            reason: "file is empty",
        });
    }
    Ok(())
}

/// `movie.mp4` -> `movie.partial.mp4`, in the same directory so the final
/// rename never crosses filesystems. The extension is kept because the
/// encoder picks the container from it.
fn staging_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match output.extension() {
        Some(ext) => format!("{}.partial.{}", stem, ext.to_string_lossy()),
        None => format!("{}.partial.mp4", stem),
    };
    output.with_file_name(name)
}

async fn promote(staging: &Path, output: &Path) -> io::Result<()> {
    // rename() does not replace an existing file on Windows
    #[cfg(windows)]
    {
        if let Err(e) = tokio::fs::remove_file(output).await {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(e);
            }
        }
    }
    tokio::fs::rename(staging, output).await
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("[muxer] removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("[muxer] could not remove {}: {}", path.display(), e),
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::MergeMode;
    use crate::downloader::traits::SilentProgress;

    #[test]
    fn test_staging_path_keeps_extension() {
        assert_eq!(
            staging_path(Path::new("/out/movie.mp4")),
            PathBuf::from("/out/movie.partial.mp4")
        );
        assert_eq!(
            staging_path(Path::new("/out/movie")),
            PathBuf::from("/out/movie.partial.mp4")
        );
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        let text = "a\nb\n\nc\nd\n";
        assert_eq!(tail(text, 2), "c\nd");
        assert_eq!(tail(text, 10), "a\nb\nc\nd");
    }

    #[tokio::test]
    async fn test_missing_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("v.mp4");
        std::fs::write(&video, b"v").unwrap();
        let job = MergeJob::new(&video, dir.path().join("a.m4s"), dir.path().join("o.mp4"), MergeMode::Copy);

        let err = Muxer::new("ffmpeg")
            .merge(job, &SilentProgress, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        match err {
            MuxError::InvalidInput { path, .. } => assert!(path.ends_with("a.m4s")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("v.mp4");
        let audio = dir.path().join("a.m4s");
        std::fs::write(&video, b"").unwrap();
        std::fs::write(&audio, b"a").unwrap();
        let job = MergeJob::new(&video, &audio, dir.path().join("o.mp4"), MergeMode::Copy);

        let err = Muxer::new("ffmpeg")
            .merge(job, &SilentProgress, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MuxError::InvalidInput { reason: "file is empty", .. }));
    }

    #[cfg(unix)]
    mod with_encoder {
        use super::*;
        use crate::downloader::test_support::{fake_encoder, COPYING_ENCODER, FAILING_ENCODER};

        fn inputs(dir: &Path) -> (PathBuf, PathBuf) {
            let video = dir.join("temp_video.mp4");
            let audio = dir.join("temp_audio.m4s");
            std::fs::write(&video, b"video").unwrap();
            std::fs::write(&audio, b"audio").unwrap();
            (video, audio)
        }

        #[tokio::test]
        async fn test_successful_merge() {
            let dir = tempfile::tempdir().unwrap();
            let encoder = fake_encoder(dir.path(), "enc.sh", COPYING_ENCODER);
            let (video, audio) = inputs(dir.path());
            let output = dir.path().join("out/final.mp4");

            let job = MergeJob::new(&video, &audio, &output, MergeMode::Copy);
            let job = Muxer::new(encoder)
                .merge(job, &SilentProgress, &CancellationToken::new(), None)
                .await
                .unwrap();

            assert_eq!(job.state, TaskState::Completed);
            assert_eq!(std::fs::read(&output).unwrap(), b"muxed-output");
            assert!(!staging_path(&output).exists());
            // No workspace given, so user inputs stay
            assert!(video.exists() && audio.exists());
        }

        #[tokio::test]
        async fn test_failed_merge_leaves_output_untouched() {
            let dir = tempfile::tempdir().unwrap();
            let encoder = fake_encoder(dir.path(), "enc.sh", FAILING_ENCODER);
            let (video, audio) = inputs(dir.path());
            let output = dir.path().join("final.mp4");
            std::fs::write(&output, b"previous good file").unwrap();

            let job = MergeJob::new(&video, &audio, &output, MergeMode::Transcode);
            let err = Muxer::new(encoder)
                .merge(job, &SilentProgress, &CancellationToken::new(), None)
                .await
                .unwrap_err();

            match err {
                MuxError::EncoderFailed { code, stderr } => {
                    assert_eq!(code, Some(1));
                    assert!(stderr.contains("Could not find tag for codec"));
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(std::fs::read(&output).unwrap(), b"previous good file");
            assert!(!staging_path(&output).exists());
        }

        #[tokio::test]
        async fn test_success_without_output_is_failure() {
            let dir = tempfile::tempdir().unwrap();
            let encoder = fake_encoder(dir.path(), "enc.sh", "exit 0");
            let (video, audio) = inputs(dir.path());
            let output = dir.path().join("final.mp4");

            let job = MergeJob::new(&video, &audio, &output, MergeMode::Copy);
            let err = Muxer::new(encoder)
                .merge(job, &SilentProgress, &CancellationToken::new(), None)
                .await
                .unwrap_err();
            assert!(matches!(err, MuxError::EmptyOutput(_)));
            assert!(!output.exists());
        }

        #[tokio::test]
        async fn test_missing_encoder() {
            let dir = tempfile::tempdir().unwrap();
            let (video, audio) = inputs(dir.path());
            let job = MergeJob::new(&video, &audio, dir.path().join("o.mp4"), MergeMode::Copy);

            let err = Muxer::new(dir.path().join("no-such-encoder"))
                .merge(job, &SilentProgress, &CancellationToken::new(), None)
                .await
                .unwrap_err();
            assert!(matches!(err, MuxError::EncoderMissing { .. }));
        }

        #[tokio::test]
        async fn test_configured_encoder_typo_is_not_replaced() {
            let dir = tempfile::tempdir().unwrap();
            let (video, audio) = inputs(dir.path());
            let typo = dir.path().join("tools/ffmpg");
            let config = PipelineConfig::default().with_encoder(typo.to_str().map(String::from));
            let muxer = Muxer::from_config(&config);
            assert_eq!(muxer.encoder_path().await, typo);

            let job = MergeJob::new(&video, &audio, dir.path().join("o.mp4"), MergeMode::Copy);
            let err = muxer
                .merge(job, &SilentProgress, &CancellationToken::new(), None)
                .await
                .unwrap_err();
            match err {
                MuxError::EncoderMissing { tool } => assert!(tool.ends_with("ffmpg")),
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_workspace_artifacts_removed_on_failure() {
            let dir = tempfile::tempdir().unwrap();
            let encoder = fake_encoder(dir.path(), "enc.sh", FAILING_ENCODER);
            let workspace = TempWorkspace::create(&dir.path().join("ws")).unwrap();
            std::fs::write(workspace.video_path(), b"video").unwrap();
            std::fs::write(workspace.audio_path(), b"audio").unwrap();

            let job = MergeJob::new(
                workspace.video_path(),
                workspace.audio_path(),
                dir.path().join("o.mp4"),
                MergeMode::Copy,
            );
            let result = Muxer::new(encoder)
                .merge(job, &SilentProgress, &CancellationToken::new(), Some(&workspace))
                .await;

            assert!(result.is_err());
            assert!(!workspace.video_path().exists());
            assert!(!workspace.audio_path().exists());
        }

        #[tokio::test]
        async fn test_cancel_kills_encoder() {
            let dir = tempfile::tempdir().unwrap();
            let encoder = fake_encoder(
                dir.path(),
                "enc.sh",
                "for last; do :; done\nprintf 'partial' > \"$last\"\nsleep 30",
            );
            let (video, audio) = inputs(dir.path());
            let output = dir.path().join("final.mp4");

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                trigger.cancel();
            });

            let job = MergeJob::new(&video, &audio, &output, MergeMode::Copy);
            let job = Muxer::new(encoder)
                .merge(job, &SilentProgress, &cancel, None)
                .await
                .unwrap();

            assert_eq!(job.state, TaskState::Cancelled);
            assert!(!output.exists());
            assert!(!staging_path(&output).exists());
        }
    }
}
