//! Append-only turn log per session.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::lock::SessionLocks;
use crate::traits::SessionStore;
use crate::types::Turn;

/// Ordered (input, output) history of each session.
#[derive(Clone)]
pub struct TurnLog {
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
    lock_timeout: Duration,
}

impl TurnLog {
    pub fn new(store: Arc<dyn SessionStore>, locks: SessionLocks, lock_timeout: Duration) -> Self {
        Self {
            store,
            locks,
            lock_timeout,
        }
    }

    /// Append a turn under the next sequential index and return it as stored.
    pub async fn append(
        &self,
        session_id: &str,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Result<Turn> {
        let store = Arc::clone(&self.store);
        let session = session_id.to_string();
        let input = input.into();
        let output = output.into();

        self.locks
            .run_exclusive(session_id, self.lock_timeout, "append", move || async move {
                let index = store.count_turns(&session).await?;
                let turn = Turn::new(index, input, output);
                store.put_turn(&session, &turn).await?;

                tracing::debug!(session_id = %session, index, "Turn appended");
                Ok(turn)
            })
            .await
    }

    /// The last `window` turns, oldest first. Empty for unknown sessions.
    pub async fn recent(&self, session_id: &str, window: usize) -> Result<Vec<Turn>> {
        self.store.get_recent_turns(session_id, window).await
    }

    /// Total turns ever appended. Compaction does not reduce it.
    pub async fn count(&self, session_id: &str) -> Result<u64> {
        self.store.count_turns(session_id).await
    }

    /// Turns with `index >= from_index`, oldest first.
    pub async fn since(&self, session_id: &str, from_index: u64) -> Result<Vec<Turn>> {
        self.store.get_turns(session_id, Some(from_index)).await
    }
}
