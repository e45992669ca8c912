//! Handoff target for finished files.
//!
//! The download task hands each completed file to a [`Sink`] exactly once and
//! does not wait for an acknowledgment: what the sink does with the bytes,
//! and whether it succeeds, is its own business.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, instrument};

use super::error::SinkError;
use super::filename::{candidate_paths, split_relative_name};

/// A finished file ready to be saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    /// Final bytes.
    pub bytes: Vec<u8>,
    /// Relative file name, `/`-separated.
    pub file_name: String,
    /// File identifier.
    pub id: String,
    /// Batch the file belongs to.
    pub batch_id: u64,
}

/// Receives finished files.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Takes ownership of a finished file. Best-effort, no acknowledgment.
    async fn save(&self, file: SavedFile);
}

/// [`Sink`] writing files under a root directory.
///
/// Name collisions get a numeric suffix instead of overwriting. A name is
/// claimed by creating the file exclusively, so concurrent writers of the
/// same name never share a path.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    /// Creates a sink rooted at `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `file` and returns where it landed.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] when the directory or file cannot be written.
    #[instrument(level = "debug", skip(self, file), fields(id = %file.id, name = %file.file_name))]
    pub async fn write(&self, file: &SavedFile) -> Result<PathBuf, SinkError> {
        let (subdir, leaf) = split_relative_name(&file.file_name);
        let dir = self.root.join(subdir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SinkError::io(&dir, e))?;

        let (path, mut out) = claim_path(&dir, &leaf).await?;
        out.write_all(&file.bytes)
            .await
            .map_err(|e| SinkError::io(&path, e))?;
        out.flush().await.map_err(|e| SinkError::io(&path, e))?;

        debug!(path = %path.display(), bytes = file.bytes.len(), batch = file.batch_id, "file saved");
        Ok(path)
    }
}

/// Creates the first candidate path for `leaf` that does not exist yet.
async fn claim_path(dir: &Path, leaf: &str) -> Result<(PathBuf, File), SinkError> {
    for path in candidate_paths(dir, leaf) {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(out) => return Ok((path, out)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(SinkError::io(&path, e)),
        }
    }
    Err(SinkError::io(
        dir.join(leaf),
        std::io::Error::from(ErrorKind::AlreadyExists),
    ))
}

#[async_trait]
impl Sink for DirectorySink {
    async fn save(&self, file: SavedFile) {
        if let Err(e) = self.write(&file).await {
            error!(id = %file.id, error = %e, "failed to save file");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn saved(name: &str, bytes: &[u8]) -> SavedFile {
        SavedFile {
            bytes: bytes.to_vec(),
            file_name: name.to_string(),
            id: "1_p0".to_string(),
            batch_id: 1,
        }
    }

    #[tokio::test]
    async fn test_write_creates_user_directory() {
        let temp = TempDir::new().unwrap();
        let sink = DirectorySink::new(temp.path());
        let path = sink.write(&saved("42/1_p0.png", b"png")).await.unwrap();
        assert_eq!(path, temp.path().join("42").join("1_p0.png"));
        assert_eq!(std::fs::read(path).unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_write_does_not_overwrite() {
        let temp = TempDir::new().unwrap();
        let sink = DirectorySink::new(temp.path());
        sink.save(saved("42/1_p0.png", b"first")).await;
        let second = sink.write(&saved("42/1_p0.png", b"second")).await.unwrap();
        assert_eq!(second, temp.path().join("42").join("1_p0_1.png"));
        assert_eq!(
            std::fs::read(temp.path().join("42").join("1_p0.png")).unwrap(),
            b"first"
        );
    }

    #[tokio::test]
    async fn test_write_stays_under_root() {
        let temp = TempDir::new().unwrap();
        let sink = DirectorySink::new(temp.path());
        let path = sink.write(&saved("../../escape.png", b"x")).await.unwrap();
        assert!(path.starts_with(temp.path()));
    }

    #[tokio::test]
    async fn test_concurrent_writes_of_one_name_get_distinct_paths() {
        let temp = TempDir::new().unwrap();
        let sink = DirectorySink::new(temp.path());
        let first = saved("42/a.png", b"first");
        let second = saved("42/a.png", b"second");

        let (a, b) = tokio::join!(sink.write(&first), sink.write(&second));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a, b);
        let mut names = vec![a.clone(), b.clone()];
        names.sort();
        assert_eq!(
            names,
            vec![temp.path().join("42").join("a.png"), temp.path().join("42").join("a_1.png")]
        );
        assert_eq!(std::fs::read(a).unwrap(), b"first");
        assert_eq!(std::fs::read(b).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_write_into_a_file_path_fails() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("42"), b"not a directory").unwrap();
        let sink = DirectorySink::new(temp.path());
        let error = sink.write(&saved("42/a.png", b"x")).await.unwrap_err();
        assert!(matches!(error, SinkError::Io { .. }));
    }
}
