//! Compute-once value handles shared by every holder of a cache entry.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt, Shared};

use crate::error::{CacheError, CacheResult};

/// A value that is being computed, or has been computed, exactly once.
///
/// Cloning the handle shares the same underlying computation: all holders
/// observe the same eventual `Ok` or `Err`.
pub struct CachedAsyncValue<T> {
    inner: Shared<BoxFuture<'static, CacheResult<Arc<T>>>>,
}

impl<T> Clone for CachedAsyncValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> CachedAsyncValue<T> {
    /// An already-resolved value.
    pub fn ready(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc(value: Arc<T>) -> Self {
        Self {
            inner: future::ready(Ok(value)).boxed().shared(),
        }
    }

    /// An already-failed value.
    pub fn failed(err: CacheError) -> Self {
        Self {
            inner: future::ready(Err(err)).boxed().shared(),
        }
    }

    /// Wrap a future that only makes progress while someone awaits it.
    pub fn lazy<F>(fut: F) -> Self
    where
        F: Future<Output = CacheResult<T>> + Send + 'static,
    {
        Self {
            inner: fut.map(|res| res.map(Arc::new)).boxed().shared(),
        }
    }

    /// Run the future on the tokio runtime right away.
    ///
    /// The computation completes even if every caller stops awaiting it, so
    /// an abandoned request still leaves a warm cache entry behind.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        Self {
            inner: async move {
                match handle.await {
                    Ok(res) => res.map(Arc::new),
                    Err(join_err) => Err(CacheError::TaskFailed(join_err.to_string())),
                }
            }
            .boxed()
            .shared(),
        }
    }

    /// Wait for the value.
    pub async fn get(&self) -> CacheResult<Arc<T>> {
        self.inner.clone().await
    }
}

impl<T> fmt::Debug for CachedAsyncValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.inner.peek().is_some() {
            "resolved"
        } else {
            "pending"
        };
        f.debug_struct("CachedAsyncValue").field("state", &state).finish()
    }
}
