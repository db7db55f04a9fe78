use std::ffi::OsString;

use async_trait::async_trait;

use crate::downloader::traits::MuxBackend;

/// Repackages both streams as-is (`-c copy`)
pub struct CopyBackend;

#[async_trait]
impl MuxBackend for CopyBackend {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn codec_args(&self) -> Vec<OsString> {
        vec!["-c".into(), "copy".into()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_copy_args() {
        let args = CopyBackend.encoder_args(
            Path::new("/w/temp_video.mp4"),
            Path::new("/w/temp_audio.m4s"),
            Path::new("/out/movie.partial.mp4"),
        );
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let i = args.iter().position(|a| a == "-c").unwrap();
        assert_eq!(args[i + 1], "copy");
        assert_eq!(args.last().unwrap(), "/out/movie.partial.mp4");
        assert!(args.contains(&"-y".to_string()));
        assert_eq!(
            args.iter().filter(|a| *a == "-i").count(),
            2,
            "both inputs passed"
        );
    }
}
