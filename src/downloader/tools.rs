// ToolManager - locate the external encoder and report its version

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::utils;

pub const ENCODER_BINARY: &str = "ffmpeg";

const VERSION_TIMEOUT_SECS: u64 = 10;
const LOOKUP_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
    pub is_available: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ToolManager {
    explicit: Option<PathBuf>,
}

impl ToolManager {
    /// `explicit` comes from config or `--encoder` and always wins
    pub fn new(explicit: Option<&str>) -> Self {
        Self {
            explicit: explicit
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            explicit: Some(path.into()),
        }
    }

    /// Path to run the encoder with.
    ///
    /// An explicit path is returned as given, even when it does not exist,
    /// so a typo fails at spawn instead of running some other binary. A bare
    /// name (explicit or default) goes through discovery and falls back to
    /// itself so the OS search path gets the final say.
    pub async fn encoder_path(&self) -> PathBuf {
        match &self.explicit {
            Some(path) if is_path_like(path) => path.clone(),
            Some(name) => search(&name.to_string_lossy())
                .await
                .unwrap_or_else(|| name.clone()),
            None => search(binary_name())
                .await
                .unwrap_or_else(|| PathBuf::from(binary_name())),
        }
    }

    pub async fn encoder_info(&self) -> ToolInfo {
        let path = self.detect().await;
        let version = match &path {
            Some(p) => get_version(p).await,
            None => None,
        };

        ToolInfo {
            name: ENCODER_BINARY.to_string(),
            version,
            is_available: path.is_some(),
            path,
        }
    }

    async fn detect(&self) -> Option<PathBuf> {
        match &self.explicit {
            Some(path) if is_path_like(path) => exists(path).await.then(|| path.clone()),
            Some(name) => search(&name.to_string_lossy()).await,
            None => search(binary_name()).await,
        }
    }
}

fn is_path_like(path: &Path) -> bool {
    path.components().count() > 1
}

fn binary_name() -> &'static str {
    if cfg!(windows) {
        "ffmpeg.exe"
    } else {
        ENCODER_BINARY
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

async fn search(binary: &str) -> Option<PathBuf> {
    // 1. Common install locations (GUI launches often miss the shell PATH)
    let common_dirs = ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"];
    for dir in common_dirs {
        let candidate = Path::new(dir).join(binary);
        if exists(&candidate).await {
            return Some(candidate);
        }
    }

    // 2. PATH
    let finder = if cfg!(windows) { "where" } else { "which" };
    let mut cmd = utils::command(finder);
    cmd.arg(binary);
    let output = utils::run_output_with_timeout(cmd, LOOKUP_TIMEOUT_SECS)
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
}

async fn get_version(path: &Path) -> Option<String> {
    let mut cmd = utils::command(path);
    cmd.arg("-version");
    match utils::run_output_with_timeout(cmd, VERSION_TIMEOUT_SECS).await {
        // "ffmpeg version 6.1.1 Copyright (c) ..."
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|line| line.split(" Copyright").next().unwrap_or(line).trim().to_string()),
        Ok(output) => {
            tracing::debug!("[tools] {} -version exited with {}", path.display(), output.status);
            None
        }
        Err(e) => {
            tracing::debug!("[tools] could not run {}: {}", path.display(), e);
            None
        }
    }
}
