// Seams between the pipeline stages and whoever is watching them

use std::ffi::OsString;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::backends::EncoderProgress;
use super::models::PipelineEvent;
use super::utils::{self, ProcessOutcome};

/// Receives progress from a running stage. Implementations must be cheap;
/// they are called once per chunk.
pub trait ProgressSink: Send + Sync {
    /// `fraction` is in `0.0..=1.0`
    fn progress(&self, fraction: f64);

    fn status(&self, message: &str);
}

/// Sink that drops everything
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn progress(&self, _fraction: f64) {}
    fn status(&self, _message: &str) {}
}

/// Progress emitter helper: forwards pipeline events over a channel and
/// keeps the overall percentage monotonic.
#[derive(Clone)]
pub struct ProgressEmitter {
    tx: mpsc::UnboundedSender<PipelineEvent>,
    last_percent: Arc<AtomicU8>,
}

impl ProgressEmitter {
    pub fn new(tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self {
            tx,
            last_percent: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn emit(&self, event: PipelineEvent) {
        // Receiver gone means nobody is listening anymore
        let _ = self.tx.send(event);
    }

    /// Emit `percent` only if it moves the overall indicator forward
    pub fn percent(&self, percent: u8) {
        let percent = percent.min(100);
        let previous = self.last_percent.fetch_max(percent, Ordering::AcqRel);
        if percent > previous {
            self.emit(PipelineEvent::Progress { percent });
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(PipelineEvent::Status {
            message: message.into(),
        });
    }

    /// View that maps a stage's `0.0..=1.0` onto `start..=end` percent
    pub fn band(&self, start: u8, end: u8, label: &'static str) -> BandedProgress<'_> {
        BandedProgress {
            emitter: self,
            start,
            end: end.max(start),
            label,
            last_local: AtomicU8::new(0),
        }
    }
}

pub struct BandedProgress<'a> {
    emitter: &'a ProgressEmitter,
    start: u8,
    end: u8,
    label: &'static str,
    last_local: AtomicU8,
}

impl ProgressSink for BandedProgress<'_> {
    fn progress(&self, fraction: f64) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let span = f64::from(self.end - self.start);
        self.emitter
            .percent(self.start + (span * fraction).floor() as u8);

        let local = (fraction * 100.0).floor() as u8;
        if local > self.last_local.fetch_max(local, Ordering::AcqRel) {
            self.emitter.status(format!("{}: {}%", self.label, local));
        }
    }

    fn status(&self, message: &str) {
        self.emitter.status(format!("{}: {}", self.label, message));
    }
}

/// A way of combining one video and one audio file with the external encoder
#[async_trait]
pub trait MuxBackend: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    /// Codec arguments placed between the inputs and the output
    fn codec_args(&self) -> Vec<OsString>;

    /// Full encoder argument list writing to `output`
    fn encoder_args(&self, video: &Path, audio: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(video.as_os_str().to_owned());
        args.push("-i".into());
        args.push(audio.as_os_str().to_owned());
        args.extend(
            ["-map", "0:v:0", "-map", "1:a:0"]
                .into_iter()
                .map(OsString::from),
        );
        args.extend(self.codec_args());
        args.extend(
            ["-progress", "pipe:1", "-nostats"]
                .into_iter()
                .map(OsString::from),
        );
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Run the encoder, reporting progress and killing it on cancellation
    async fn run(
        &self,
        encoder: &Path,
        video: &Path,
        audio: &Path,
        output: &Path,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> std::io::Result<ProcessOutcome> {
        let mut cmd = utils::command(encoder);
        cmd.args(self.encoder_args(video, audio, output));
        tracing::debug!("[muxer] {} via {}", self.name(), encoder.display());

        let mut progress = EncoderProgress::default();
        utils::run_lines_cancellable(cmd, cancel, |line| {
            if let Some(fraction) = progress.observe(line) {
                sink.progress(fraction);
            }
        })
        .await
    }
}
