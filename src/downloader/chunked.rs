// ChunkedDownloader - stream one HTTP resource to a local file

use std::path::Path;

use reqwest::{Client, Response};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::config::PipelineConfig;
use super::errors::DownloadError;
use super::models::{DownloadTask, TaskState};
use super::traits::ProgressSink;

/// Without a Content-Length we only report every this many bytes
const COARSE_STATUS_STEP: u64 = 1024 * 1024;

enum Flow {
    Finished,
    Cancelled,
}

#[derive(Clone)]
pub struct ChunkedDownloader {
    client: Client,
    chunk_size: usize,
}

impl ChunkedDownloader {
    pub fn new(client: Client, chunk_size: usize) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_config(client: Client, config: &PipelineConfig) -> Self {
        Self::new(client, config.effective_chunk_size())
    }

    /// Download `url` into `destination`, replacing whatever is there.
    ///
    /// Returns the task in state `Completed` or `Cancelled`. A cancelled
    /// download keeps its partial file; a failed one removes it.
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DownloadTask, DownloadError> {
        let mut task = DownloadTask::new(url, destination);
        if cancel.is_cancelled() {
            task.state = TaskState::Cancelled;
            return Ok(task);
        }

        task.state = TaskState::Running;
        tracing::info!("[chunked] GET {} -> {}", url, destination.display());

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                task.state = TaskState::Cancelled;
                return Ok(task);
            }
            response = self.client.get(url).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("[chunked] {} answered {}", url, status);
            return Err(DownloadError::Status(status));
        }
        task.total_bytes = response.content_length();

        // File::create truncates, so nothing from an earlier attempt survives.
        let mut file = File::create(destination)
            .await
            .map_err(|e| DownloadError::io(destination, e))?;

        let streamed = self
            .stream_body(response, &mut file, &mut task, sink, cancel)
            .await;
        let flushed = file.flush().await;
        drop(file);

        let outcome = streamed
            .and_then(|flow| flushed.map(|_| flow).map_err(|e| DownloadError::io(destination, e)))
            .and_then(|flow| {
                if let Flow::Finished = flow {
                    check_complete(&task)?;
                }
                Ok(flow)
            });

        match outcome {
            Ok(Flow::Finished) => {
                task.state = TaskState::Completed;
                sink.progress(1.0);
                tracing::info!(
                    "[chunked] finished {} ({} bytes)",
                    destination.display(),
                    task.bytes_transferred
                );
                Ok(task)
            }
            Ok(Flow::Cancelled) => {
                task.state = TaskState::Cancelled;
                tracing::info!(
                    "[chunked] cancelled {} after {} bytes",
                    destination.display(),
                    task.bytes_transferred
                );
                Ok(task)
            }
            Err(err) => {
                task.state = TaskState::Failed;
                if let Err(e) = tokio::fs::remove_file(destination).await {
                    tracing::warn!(
                        "[chunked] could not remove partial {}: {}",
                        destination.display(),
                        e
                    );
                }
                Err(err)
            }
        }
    }

    async fn stream_body(
        &self,
        mut response: Response,
        file: &mut File,
        task: &mut DownloadTask,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Flow, DownloadError> {
        let mut next_status_at = COARSE_STATUS_STEP;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Flow::Cancelled),
                chunk = response.chunk() => chunk?,
            };
            let Some(chunk) = chunk else {
                return Ok(Flow::Finished);
            };

            for piece in chunk.chunks(self.chunk_size) {
                if cancel.is_cancelled() {
                    return Ok(Flow::Cancelled);
                }
                file.write_all(piece)
                    .await
                    .map_err(|e| DownloadError::io(&task.destination, e))?;
                task.record(piece.len());

                match task.fraction() {
                    Some(fraction) => sink.progress(fraction),
                    None if task.bytes_transferred >= next_status_at => {
                        sink.status(&format!("{} KiB received", task.bytes_transferred / 1024));
                        next_status_at += COARSE_STATUS_STEP;
                    }
                    None => {}
                }
            }
        }
    }
}

fn check_complete(task: &DownloadTask) -> Result<(), DownloadError> {
    match task.total_bytes {
        Some(expected) if task.bytes_transferred < expected => Err(DownloadError::Truncated {
            expected,
            received: task.bytes_transferred,
        }),
        Some(0) => Ok(()),
        _ if task.bytes_transferred == 0 => Err(DownloadError::Empty {
            url: task.source_url.clone(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::test_support::serve;
    use crate::downloader::traits::SilentProgress;
    use axum::body::{Body, Bytes};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::sync::Mutex;

    const SMALL: usize = 8 * 1024;

    fn payload(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_add(seed)).collect()
    }

    fn downloader() -> ChunkedDownloader {
        ChunkedDownloader::new(Client::new(), SMALL)
    }

    #[derive(Default)]
    struct Recorder {
        fractions: Mutex<Vec<f64>>,
        statuses: Mutex<Vec<String>>,
    }

    impl ProgressSink for Recorder {
        fn progress(&self, fraction: f64) {
            self.fractions.lock().unwrap().push(fraction);
        }
        fn status(&self, message: &str) {
            self.statuses.lock().unwrap().push(message.to_string());
        }
    }

    /// Cancels the token the first time progress is reported
    struct CancelOnFirst {
        cancel: CancellationToken,
        last: Mutex<Option<f64>>,
    }

    impl ProgressSink for CancelOnFirst {
        fn progress(&self, fraction: f64) {
            *self.last.lock().unwrap() = Some(fraction);
            self.cancel.cancel();
        }
        fn status(&self, _message: &str) {}
    }

    #[tokio::test]
    async fn test_download_reports_progress() {
        let body = payload(64 * 1024, 0);
        let served = body.clone();
        let app = Router::new().route("/v", get(move || async move { served }));
        let addr = serve(app).await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("temp_video.mp4");
        let sink = Recorder::default();

        let task = downloader()
            .download(&format!("http://{addr}/v"), &dest, &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.total_bytes, Some(body.len() as u64));
        assert_eq!(task.bytes_transferred, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);

        let fractions = sink.fractions.lock().unwrap();
        assert!(fractions.len() >= 8, "one report per 8 KiB piece");
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*fractions.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_second_download_replaces_first() {
        let app = Router::new()
            .route("/big", get(|| async { payload(40 * 1024, 1) }))
            .route("/small", get(|| async { payload(1000, 2) }));
        let addr = serve(app).await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("temp_audio.m4s");
        let cancel = CancellationToken::new();

        downloader()
            .download(&format!("http://{addr}/big"), &dest, &SilentProgress, &cancel)
            .await
            .unwrap();
        downloader()
            .download(&format!("http://{addr}/small"), &dest, &SilentProgress, &cancel)
            .await
            .unwrap();

        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 1000);
        assert_eq!(std::fs::read(&dest).unwrap(), payload(1000, 2));
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial_file() {
        let total = 64 * 1024;
        let app = Router::new().route("/v", get(move || async move { payload(total, 3) }));
        let addr = serve(app).await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("temp_video.mp4");
        let cancel = CancellationToken::new();
        let sink = CancelOnFirst {
            cancel: cancel.clone(),
            last: Mutex::new(None),
        };

        let task = downloader()
            .download(&format!("http://{addr}/v"), &dest, &sink, &cancel)
            .await
            .expect("cancellation is not an error");

        assert_eq!(task.state, TaskState::Cancelled);
        assert!(task.bytes_transferred < total as u64);
        let last = sink.last.lock().unwrap().unwrap();
        assert!(task.bytes_transferred as f64 <= last * total as f64 + 0.5);
        assert_eq!(
            std::fs::metadata(&dest).unwrap().len(),
            task.bytes_transferred,
            "partial file left for the caller"
        );
    }

    #[tokio::test]
    async fn test_cancel_before_start_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("temp_video.mp4");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let task = downloader()
            .download("http://127.0.0.1:9/never", &dest, &SilentProgress, &cancel)
            .await
            .unwrap();
        assert_eq!(task.state, TaskState::Cancelled);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let app = Router::new().route("/v", get(|| async { StatusCode::NOT_FOUND }));
        let addr = serve(app).await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("temp_video.mp4");
        let err = downloader()
            .download(&format!("http://{addr}/v"), &dest, &SilentProgress, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            DownloadError::Status(status) => assert_eq!(status.as_u16(), 404),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_empty_body_is_failure() {
        let app = Router::new().route(
            "/v",
            get(|| async {
                let stream = futures_util::stream::iter(Vec::<Result<Bytes, std::io::Error>>::new());
                Body::from_stream(stream)
            }),
        );
        let addr = serve(app).await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("temp_video.mp4");
        let err = downloader()
            .download(&format!("http://{addr}/v"), &dest, &SilentProgress, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Empty { .. }));
        assert!(!dest.exists(), "failed download removes its file");
    }

    #[tokio::test]
    async fn test_unknown_length_still_downloads() {
        let app = Router::new().route(
            "/a",
            get(|| async {
                let parts: Vec<Result<Bytes, std::io::Error>> = (0..3)
                    .map(|i| Ok(Bytes::from(payload(10_000, i))))
                    .collect();
                Body::from_stream(futures_util::stream::iter(parts))
            }),
        );
        let addr = serve(app).await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("temp_audio.m4s");
        let sink = Recorder::default();
        let task = downloader()
            .download(&format!("http://{addr}/a"), &dest, &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(task.total_bytes, None);
        assert_eq!(task.bytes_transferred, 30_000);
        // Only the completion report; no percentages without a size.
        assert_eq!(*sink.fractions.lock().unwrap(), vec![1.0]);
    }
}
