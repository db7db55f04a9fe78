use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::ConfigError;
use super::models::{MergeMode, NetworkConfig};

pub const DEFAULT_API_BASE: &str = "https://api.bilibili.tv/intl/gateway/web/playurl";
pub const DEFAULT_REFERER: &str = "https://www.bilibili.tv/";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

pub const MIN_CHUNK_SIZE: usize = 8 * 1024;
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

const APP_DIR: &str = "bilitv-downloader";
const CONFIG_FILE: &str = "config.json";

/// Settings for one pipeline; every field has a default so a partial
/// `config.json` is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub api_base: String,
    pub locale: String,
    pub referer: String,
    pub user_agent: String,
    /// Encoder program; discovered when unset
    pub encoder: Option<String>,
    pub merge_mode: MergeMode,
    pub chunk_size: usize,
    pub network: NetworkConfig,
    /// Parent for per-run temp workspaces; system temp dir when unset
    pub workspace_root: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            locale: "th_TH".to_string(),
            referer: DEFAULT_REFERER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            encoder: None,
            merge_mode: MergeMode::Copy,
            chunk_size: MIN_CHUNK_SIZE,
            network: NetworkConfig::default(),
            workspace_root: None,
        }
    }
}

impl PipelineConfig {
    /// Default location: `<config dir>/bilitv-downloader/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location when it exists,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };

        let mut config = match candidate {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("[config] loaded {}", path.display());
        Ok(config)
    }

    /// `BILITV_ENCODER` and `BILITV_PROXY` win over the file
    pub fn apply_env(&mut self) {
        if let Some(encoder) = non_empty_env("BILITV_ENCODER") {
            self.encoder = Some(encoder);
        }
        if let Some(proxy) = non_empty_env("BILITV_PROXY") {
            self.network.proxy = Some(proxy);
        }
    }

    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
    }

    pub fn effective_workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn with_merge_mode(mut self, mode: MergeMode) -> Self {
        self.merge_mode = mode;
        self
    }

    pub fn with_encoder(mut self, encoder: Option<String>) -> Self {
        if encoder.is_some() {
            self.encoder = encoder;
        }
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        if proxy.is_some() {
            self.network.proxy = proxy;
        }
        self
    }

    pub fn with_workspace_root(mut self, root: Option<PathBuf>) -> Self {
        if root.is_some() {
            self.workspace_root = root;
        }
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
