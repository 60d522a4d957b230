// src/fetch/cache.rs

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::OnceCell;
use tracing::debug;

use super::{FetchError, RawPayload};

/// In-memory payload cache keyed by [`DatasetRequest::cache_key`](super::DatasetRequest::cache_key).
///
/// Each key owns its own cell, so at most one fetch per key runs at a time;
/// concurrent callers for the same key wait on it. A failed fetch leaves no
/// entry behind. A leader that is dropped mid-fetch hands the fetch to the
/// next waiter. Successful payloads stay until [`invalidate`](Self::invalidate).
#[derive(Debug, Default)]
pub struct PayloadCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<Arc<RawPayload>>>>>,
}

impl PayloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<Arc<RawPayload>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RawPayload, FetchError>>,
    {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(key.to_string()).or_default())
        };

        if let Some(hit) = cell.get() {
            debug!(key, "payload cache hit");
            return Ok(Arc::clone(hit));
        }

        let result = cell
            .get_or_try_init(|| async {
                debug!(key, "payload cache miss");
                fetch().await.map(Arc::new)
            })
            .await
            .map(Arc::clone);
        if result.is_err() {
            self.discard_empty(key, &cell);
        }
        result
    }

    /// Drop the entry for `key` if it is still `cell`, holds no payload and no
    /// other caller is waiting on it. The map and `cell` account for two references.
    fn discard_empty(&self, key: &str, cell: &Arc<OnceCell<Arc<RawPayload>>>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let stale = entries.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, cell) && !current.initialized() && Arc::strong_count(cell) == 2
        });
        if stale {
            entries.remove(key);
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Number of keys holding a completed payload.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
