use std::ffi::OsString;

use async_trait::async_trait;

use crate::downloader::traits::MuxBackend;

/// Re-encodes to H.264 video and AAC audio
pub struct TranscodeBackend {
    pub video_codec: &'static str,
    pub audio_codec: &'static str,
    pub audio_bitrate: &'static str,
    pub audio_rate: u32,
}

impl Default for TranscodeBackend {
    fn default() -> Self {
        Self {
            video_codec: "libx264",
            audio_codec: "aac",
            audio_bitrate: "111k",
            audio_rate: 48_000,
        }
    }
}

#[async_trait]
impl MuxBackend for TranscodeBackend {
    fn name(&self) -> &'static str {
        "transcode"
    }

    fn codec_args(&self) -> Vec<OsString> {
        vec![
            "-c:v".into(),
            self.video_codec.into(),
            "-c:a".into(),
            self.audio_codec.into(),
            "-b:a".into(),
            self.audio_bitrate.into(),
            "-ar".into(),
            self.audio_rate.to_string().into(),
        ]
    }
}
