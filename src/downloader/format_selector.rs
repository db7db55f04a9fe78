// FormatSelector - picks the stream variants out of a playurl response
//
// Video: quality 80 (1080P) first, then 64 (720P). An entry only counts
// when its URL is non-empty; upstream lists gated tiers with a blank URL.
// Audio: quality 30280 only, no fallback.

use super::errors::ResolveError;
use super::models::{ResolvedStreams, VideoQuality};
use super::resolver::{AudioResource, PlayUrl, VideoEntry};

/// The only audio variant we accept
pub const AUDIO_QUALITY: i64 = 30280;

pub struct FormatSelector;

impl FormatSelector {
    /// Pick both streams, failing when either side has nothing usable
    pub fn select(playurl: &PlayUrl) -> Result<ResolvedStreams, ResolveError> {
        let (video_quality, video_url) =
            Self::select_video(&playurl.video).ok_or(ResolveError::NoStreamFound("video"))?;
        let audio_url =
            Self::select_audio(&playurl.audio_resource).ok_or(ResolveError::NoStreamFound("audio"))?;

        Ok(ResolvedStreams {
            video_url: video_url.to_string(),
            audio_url: audio_url.to_string(),
            video_quality,
            audio_quality: AUDIO_QUALITY,
        })
    }

    /// Best video tier with a usable URL
    pub fn select_video(entries: &[VideoEntry]) -> Option<(VideoQuality, &str)> {
        VideoQuality::PREFERENCE.into_iter().find_map(|tier| {
            entries
                .iter()
                .filter_map(|e| e.video_resource.as_ref())
                .filter(|r| r.quality == tier.code())
                .find_map(|r| usable(&r.url))
                .map(|url| (tier, url))
        })
    }

    pub fn select_audio(resources: &[AudioResource]) -> Option<&str> {
        resources
            .iter()
            .filter(|a| a.quality == AUDIO_QUALITY)
            .find_map(|a| usable(&a.url))
    }
}

fn usable(url: &str) -> Option<&str> {
    let trimmed = url.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
