//! Per-session write serialization.
//!
//! A keyed table of async mutexes: writers on the same session queue up,
//! writers on different sessions never touch each other's lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{Error, Result};

/// Table size above which idle entries are dropped on the next lookup.
const PRUNE_THRESHOLD: usize = 1024;

type LockTable = HashMap<String, Arc<AsyncMutex<()>>>;

/// Keyed mutex table, one lock per session id.
#[derive(Clone, Default)]
pub struct SessionLocks {
    table: Arc<Mutex<LockTable>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);

        if table.len() >= PRUNE_THRESHOLD {
            // Only the table holds an idle lock
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
        }

        Arc::clone(table.entry(session_id.to_string()).or_default())
    }

    /// Number of sessions currently tracked.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the session's lock, giving up after `timeout`.
    pub async fn acquire(
        &self,
        session_id: &str,
        timeout: Duration,
        operation: &'static str,
    ) -> Result<OwnedMutexGuard<()>> {
        let slot = self.slot(session_id);
        tokio::time::timeout(timeout, slot.lock_owned())
            .await
            .map_err(|_| {
                Error::store_unavailable(
                    operation,
                    format!(
                        "session '{session_id}' lock not acquired within {}ms",
                        timeout.as_millis()
                    ),
                )
            })
    }

    /// Run `work` while holding the session's lock.
    ///
    /// The work runs on its own task: if the caller is dropped mid-way the
    /// work still completes and the lock is released afterwards.
    pub async fn run_exclusive<T, F, Fut>(
        &self,
        session_id: &str,
        timeout: Duration,
        operation: &'static str,
        work: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let guard = self.acquire(session_id, timeout, operation).await?;

        let task = tokio::spawn(async move {
            let _guard = guard;
            work().await
        });

        task.await
            .map_err(|e| Error::store_unavailable(operation, format!("session task failed: {e}")))?
    }
}
