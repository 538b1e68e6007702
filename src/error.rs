//! Error types for the cache and its source collaborators.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::table::ids::DatabaseId;

/// Failures reading a table from its storage or parsing it.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database not registered: {0}")]
    UnknownDatabase(DatabaseId),
}

/// Errors surfaced by the cache layer.
///
/// Cloneable because a failed [`CachedAsyncValue`](crate::cache::async_value::CachedAsyncValue)
/// delivers the same error to every holder.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The cache would become inconsistent with its source; never ignore.
    #[error("Invalid cache state: {0}")]
    InvalidState(String),

    #[error("Source read failed: {0}")]
    Source(Arc<SourceError>),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Fetch task failed: {0}")]
    TaskFailed(String),
}

impl From<SourceError> for CacheError {
    fn from(err: SourceError) -> Self {
        CacheError::Source(Arc::new(err))
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
