//! Storage connector: where table files come from.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::SourceError;
use crate::table::ids::FileId;

/// Access to the table files of one database.
///
/// Implementations own their timeouts and retries; the cache calls each
/// method at most once per miss and never retries.
#[async_trait]
pub trait StorageConnector: Send + Sync {
    /// Identifiers of every table file in the database.
    async fn list_files(&self) -> Result<Vec<FileId>, SourceError>;

    /// The complete contents of a table file.
    async fn read_file(&self, file: &FileId) -> Result<Bytes, SourceError>;

    /// When the table file was last written.
    async fn last_write_time(&self, file: &FileId) -> Result<DateTime<Utc>, SourceError>;

    /// A non-table file addressed relative to the database root.
    ///
    /// Fails with [`SourceError::NotFound`] if it does not exist.
    async fn read_auxiliary_file(&self, relative_path: &str) -> Result<Bytes, SourceError>;
}
