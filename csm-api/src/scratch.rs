//! Per-request scratch directories.
//!
//! Each request gets `<work_dir>/<uuid>` to itself. The directory is removed
//! by [`ScratchDir::cleanup`], or by `Drop` when the request future is
//! abandoned or panics before reaching cleanup. Removal errors are ignored.

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Name of the file the command is asked to write.
pub const OUTPUT_FILE_NAME: &str = "out.json";

/// Extension used when the upload's filename has none.
pub const DEFAULT_INPUT_EXTENSION: &str = ".wav";

/// Extension of `filename` including the dot, or `.wav`.
pub fn input_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_else(|| DEFAULT_INPUT_EXTENSION.to_string())
}

/// A uniquely named directory owned by one request.
#[derive(Debug)]
pub struct ScratchDir {
    id: String,
    path: PathBuf,
    armed: bool,
}

impl ScratchDir {
    /// Create a fresh directory under `root`.
    pub async fn create(root: &Path) -> std::io::Result<Self> {
        let id = Uuid::new_v4().simple().to_string();
        let path = root.join(&id);
        tokio::fs::create_dir_all(&path).await?;

        tracing::debug!(path = %path.display(), "Created scratch directory");

        Ok(Self {
            id,
            path,
            armed: true,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the upload named `filename` is stored.
    pub fn input_path(&self, filename: &str) -> PathBuf {
        self.path.join(format!("input{}", input_extension(filename)))
    }

    /// Where the command is asked to write its JSON result.
    pub fn output_path(&self) -> PathBuf {
        self.path.join(OUTPUT_FILE_NAME)
    }

    /// Remove the directory and everything in it.
    pub async fn cleanup(mut self) {
        self.armed = false;
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            tracing::debug!(path = %self.path.display(), error = %e, "Scratch cleanup failed");
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_input_extension() {
        assert_eq!(input_extension("clip.mp3"), ".mp3");
        assert_eq!(input_extension("archive.tar.gz"), ".gz");
        assert_eq!(input_extension("recording"), ".wav");
        assert_eq!(input_extension("trailing."), ".wav");
        assert_eq!(input_extension(".hidden"), ".wav");
        assert_eq!(input_extension("../../etc/voice.flac"), ".flac");
    }

    #[tokio::test]
    async fn test_create_and_cleanup() {
        let root = TempDir::new().unwrap();
        let scratch = ScratchDir::create(root.path()).await.unwrap();

        assert_eq!(scratch.id().len(), 32);
        assert!(scratch.path().is_dir());
        assert_eq!(scratch.path().parent(), Some(root.path()));
        assert_eq!(scratch.input_path("a.ogg"), scratch.path().join("input.ogg"));
        assert_eq!(scratch.output_path(), scratch.path().join("out.json"));

        std::fs::write(scratch.input_path("a.ogg"), b"data").unwrap();
        let path = scratch.path().to_path_buf();
        scratch.cleanup().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let root = TempDir::new().unwrap();
        let path = {
            let scratch = ScratchDir::create(root.path()).await.unwrap();
            std::fs::write(scratch.output_path(), b"{}").unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let root = TempDir::new().unwrap();
        let a = ScratchDir::create(root.path()).await.unwrap();
        let b = ScratchDir::create(root.path()).await.unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_cleanup_of_missing_directory_is_silent() {
        let root = TempDir::new().unwrap();
        let scratch = ScratchDir::create(root.path()).await.unwrap();
        std::fs::remove_dir_all(scratch.path()).unwrap();
        scratch.cleanup().await;
    }
}
