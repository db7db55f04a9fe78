// StreamResolver - page URL -> direct video/audio stream URLs

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Deserializer};

use super::config::PipelineConfig;
use super::errors::ResolveError;
use super::format_selector::FormatSelector;
use super::models::{MediaSource, ResolvedStreams};

/// Path segment preceding the content id in a page URL
pub const CONTENT_MARKER: &str = "/video/";

/// Top-level playurl API response
#[derive(Debug, Clone, Deserialize)]
pub struct PlayUrlResponse {
    pub code: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default)]
    pub data: Option<PlayUrlData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayUrlData {
    #[serde(default)]
    pub playurl: Option<PlayUrl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayUrl {
    #[serde(default, deserialize_with = "null_as_default")]
    pub video: Vec<VideoEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub audio_resource: Vec<AudioResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoEntry {
    #[serde(default)]
    pub video_resource: Option<VideoResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoResource {
    #[serde(default, deserialize_with = "null_as_default")]
    pub quality: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioResource {
    #[serde(default, deserialize_with = "null_as_default")]
    pub quality: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
}

/// Upstream sends `null` for gated entries; treat it like a missing key
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Derive the content id: everything after the marker up to the next `?`.
pub fn extract_content_id(source_url: &str) -> Result<MediaSource, ResolveError> {
    let not_found = || ResolveError::ContentIdNotFound(source_url.to_string());

    let start = source_url.find(CONTENT_MARKER).ok_or_else(not_found)? + CONTENT_MARKER.len();
    let rest = &source_url[start..];
    let content_id = rest.split('?').next().unwrap_or_default();
    if content_id.is_empty() {
        return Err(not_found());
    }

    Ok(MediaSource {
        source_url: source_url.to_string(),
        content_id: content_id.to_string(),
    })
}

pub struct StreamResolver {
    client: Client,
    api_base: String,
    locale: String,
    timeout: Option<Duration>,
}

impl StreamResolver {
    pub fn new(client: Client, config: &PipelineConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.clone(),
            locale: config.locale.clone(),
            timeout: config
                .network
                .timeout
                .map(|secs| Duration::from_secs(u64::from(secs))),
        }
    }

    /// Resolve both stream URLs. No network call is made when the URL
    /// carries no content id.
    pub async fn resolve(&self, source_url: &str) -> Result<ResolvedStreams, ResolveError> {
        let source = extract_content_id(source_url)?;
        tracing::info!("[resolver] content id {}", source.content_id);

        let response = self.fetch_playurl(&source.content_id).await?;
        if response.code != 0 {
            tracing::warn!(
                "[resolver] upstream refused {}: code={} {}",
                source.content_id,
                response.code,
                response.message
            );
            return Err(ResolveError::UpstreamApi {
                code: response.code,
                message: response.message,
            });
        }

        let playurl = response
            .data
            .and_then(|d| d.playurl)
            .unwrap_or_default();
        let streams = FormatSelector::select(&playurl)?;

        tracing::info!(
            "[resolver] found {} video and audio {}",
            streams.video_quality.label(),
            streams.audio_quality
        );
        tracing::debug!("[resolver] video url: {}", streams.video_url);
        tracing::debug!("[resolver] audio url: {}", streams.audio_url);
        Ok(streams)
    }

    /// Raw playurl call for `content_id`
    pub async fn fetch_playurl(&self, content_id: &str) -> Result<PlayUrlResponse, ResolveError> {
        let mut request = self.client.get(&self.api_base).query(&[
            ("s_locale", self.locale.as_str()),
            ("platform", "web"),
            ("aid", content_id),
            ("qn", "80"),
            ("type", "0"),
            ("device", "wap"),
            ("tf", "0"),
        ]);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status(status));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
