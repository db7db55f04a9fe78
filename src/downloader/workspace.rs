// Per-run scratch directory for the intermediate streams

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

pub const VIDEO_FILE: &str = "temp_video.mp4";
pub const AUDIO_FILE: &str = "temp_audio.m4s";

/// A fresh directory under the workspace root, unique per run so
/// concurrent runs never share intermediate files.
#[derive(Debug)]
pub struct TempWorkspace {
    dir: TempDir,
}

impl TempWorkspace {
    pub fn create(root: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new().prefix("bilitv-").tempdir_in(root)?;
        tracing::debug!("[workspace] created {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn video_path(&self) -> PathBuf {
        self.dir.path().join(VIDEO_FILE)
    }

    pub fn audio_path(&self) -> PathBuf {
        self.dir.path().join(AUDIO_FILE)
    }

    /// Delete both intermediate files. Failures are logged, never returned.
    pub async fn remove_artifacts(&self) {
        for path in [self.video_path(), self.audio_path()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!("[workspace] removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("[workspace] could not remove {}: {}", path.display(), e),
            }
        }
    }

    /// Remove the directory and whatever is left in it
    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        tracing::debug!("[workspace] closed {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_get_separate_directories() {
        let root = tempfile::tempdir().unwrap();
        let a = TempWorkspace::create(root.path()).unwrap();
        let b = TempWorkspace::create(root.path()).unwrap();

        assert_ne!(a.path(), b.path());
        assert_eq!(a.video_path().file_name().unwrap(), VIDEO_FILE);
        assert_eq!(b.audio_path().file_name().unwrap(), AUDIO_FILE);
        assert!(a.path().starts_with(root.path()));
    }

    #[tokio::test]
    async fn test_remove_artifacts_tolerates_missing_files() {
        let root = tempfile::tempdir().unwrap();
        let ws = TempWorkspace::create(root.path()).unwrap();
        std::fs::write(ws.video_path(), b"v").unwrap();

        ws.remove_artifacts().await;
        assert!(!ws.video_path().exists());
        assert!(!ws.audio_path().exists());
        assert!(ws.path().exists());
    }

    #[test]
    fn test_close_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let ws = TempWorkspace::create(&root.path().join("nested/root")).unwrap();
        let dir = ws.path().to_path_buf();
        std::fs::write(ws.audio_path(), b"a").unwrap();

        ws.close().unwrap();
        assert!(!dir.exists());
    }
}
