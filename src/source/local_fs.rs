//! Local filesystem connector.
//!
//! A database is a directory; each table is one file `<id>.<extension>`
//! directly inside it. Uses tokio's async file I/O.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::source::connector::StorageConnector;
use crate::table::ids::FileId;

/// Serves table files from a directory.
#[derive(Debug, Clone)]
pub struct LocalFsConnector {
    /// Database root directory.
    root: PathBuf,

    /// Table file extension, without the dot.
    extension: String,
}

impl LocalFsConnector {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, file: &FileId) -> PathBuf {
        self.root.join(format!("{}.{}", file, self.extension))
    }

    /// Resolve a path below the root. Absolute paths and `..` are refused.
    fn auxiliary_path(&self, relative_path: &str) -> Result<PathBuf, SourceError> {
        let relative = Path::new(relative_path);
        let confined = !relative_path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !confined {
            warn!(path = relative_path, "Rejected auxiliary path outside database root");
            return Err(SourceError::NotFound(relative.to_path_buf()));
        }
        Ok(self.root.join(relative))
    }

    async fn read_path(&self, path: PathBuf) -> Result<Bytes, SourceError> {
        let data = fs::read(&path).await.map_err(|e| not_found_or_io(e, &path))?;
        debug!(path = %path.display(), size = data.len(), "Read file from disk");
        Ok(Bytes::from(data))
    }
}

fn not_found_or_io(err: std::io::Error, path: &Path) -> SourceError {
    if err.kind() == ErrorKind::NotFound {
        SourceError::NotFound(path.to_path_buf())
    } else {
        SourceError::Io(err)
    }
}

#[async_trait]
impl StorageConnector for LocalFsConnector {
    async fn list_files(&self) -> Result<Vec<FileId>, SourceError> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| not_found_or_io(e, &self.root))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match FileId::new(stem) {
                Ok(id) => files.push(id),
                Err(_) => debug!(path = %path.display(), "Skipping file with unusable name"),
            }
        }
        files.sort();

        debug!(root = %self.root.display(), count = files.len(), "Listed table files");
        Ok(files)
    }

    async fn read_file(&self, file: &FileId) -> Result<Bytes, SourceError> {
        self.read_path(self.table_path(file)).await
    }

    async fn last_write_time(&self, file: &FileId) -> Result<DateTime<Utc>, SourceError> {
        let path = self.table_path(file);
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(e, &path))?;
        Ok(DateTime::<Utc>::from(metadata.modified()?))
    }

    async fn read_auxiliary_file(&self, relative_path: &str) -> Result<Bytes, SourceError> {
        let path = self.auxiliary_path(relative_path)?;
        self.read_path(path).await
    }
}
