// Helper functions shared by the resolver, downloader and muxer

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONNECTION, REFERER, USER_AGENT};
use reqwest::Client;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::config::PipelineConfig;

/// Headers the upstream origin requires; it rejects default client identification.
/// `Accept-Encoding` is added by reqwest itself so bodies are decoded transparently.
pub fn impersonation_headers(config: &PipelineConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(ua) = HeaderValue::from_str(&config.user_agent) {
        headers.insert(USER_AGENT, ua);
    } else {
        tracing::warn!("[http] ignoring invalid user agent: {:?}", config.user_agent);
    }
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Ok(referer) = HeaderValue::from_str(&config.referer) {
        headers.insert(REFERER, referer);
    }
    headers
}

/// Build the HTTP client used for both the API call and the media bodies.
/// The timeout applies to connecting only; media bodies may take minutes.
pub fn build_client(config: &PipelineConfig) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder().default_headers(impersonation_headers(config));

    if let Some(secs) = config.network.timeout {
        builder = builder.connect_timeout(Duration::from_secs(u64::from(secs)));
    }

    if let Some(proxy_url) = config.network.proxy.as_deref() {
        tracing::info!("[http] using proxy {}", proxy_url);
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    }

    builder.build()
}

/// Command configured for running in the background
pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    #[cfg(windows)]
    {
        // Keep console windows from popping up while the encoder runs.
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Run command with timeout, capturing both pipes
pub async fn run_output_with_timeout(
    mut cmd: Command,
    timeout_secs: u64,
) -> std::io::Result<std::process::Output> {
    let mut child = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;

    let stdout_task = child.stdout.take().map(|pipe| tokio::spawn(read_all(pipe)));
    let stderr_task = child.stderr.take().map(|pipe| tokio::spawn(read_all(pipe)));

    match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(status) => {
            let status = status?;
            let stdout = join_reader(stdout_task).await;
            let stderr = join_reader(stderr_task).await;
            Ok(std::process::Output {
                status,
                stdout,
                stderr,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            if let Some(task) = stdout_task {
                task.abort();
            }
            if let Some(task) = stderr_task {
                task.abort();
            }
            Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("timed out after {}s", timeout_secs),
            ))
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut pipe: R) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    buf
}

async fn join_reader(task: Option<tokio::task::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// A line of child output, tagged with the pipe it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessLine {
    Stdout(String),
    Stderr(String),
}

#[derive(Debug)]
pub enum ProcessOutcome {
    /// Child exited on its own; `stderr` holds everything it wrote there
    Exited { status: ExitStatus, stderr: String },
    /// Cancellation fired and the child was killed
    Cancelled,
}

/// Spawn `cmd`, hand every output line to `on_line`, and kill the child
/// as soon as `cancel` fires.
pub async fn run_lines_cancellable<F>(
    mut cmd: Command,
    cancel: &CancellationToken,
    mut on_line: F,
) -> std::io::Result<ProcessOutcome>
where
    F: FnMut(&ProcessLine),
{
    if cancel.is_cancelled() {
        return Ok(ProcessOutcome::Cancelled);
    }

    let mut child = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(pipe) = child.stdout.take() {
        tokio::spawn(forward_lines(pipe, tx.clone(), ProcessLine::Stdout));
    }
    if let Some(pipe) = child.stderr.take() {
        tokio::spawn(forward_lines(pipe, tx.clone(), ProcessLine::Stderr));
    }
    drop(tx);

    let mut stderr = String::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Ok(ProcessOutcome::Cancelled);
            }
            line = rx.recv() => match line {
                Some(line) => {
                    if let ProcessLine::Stderr(text) = &line {
                        stderr.push_str(text);
                        stderr.push('\n');
                    }
                    on_line(&line);
                }
                None => break,
            },
        }
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            Ok(ProcessOutcome::Cancelled)
        }
        status = child.wait() => Ok(ProcessOutcome::Exited { status: status?, stderr }),
    }
}

async fn forward_lines<R>(
    pipe: R,
    tx: mpsc::UnboundedSender<ProcessLine>,
    wrap: fn(String) -> ProcessLine,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if tx.send(wrap(line)).is_err() {
                    break;
                }
            }
        }
    }
}
