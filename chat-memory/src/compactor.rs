//! Running-summary compaction.
//!
//! Turns that fall out of the recent window are folded into a single summary
//! per session. The prior summary seeds each new one, so coverage only grows.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::lock::SessionLocks;
use crate::summarizer::Summarizer;
use crate::traits::{SessionStore, TurnSelection};
use crate::types::Summary;

/// Keeps each session's summary caught up with its turn log.
#[derive(Clone)]
pub struct SummaryCompactor {
    store: Arc<dyn SessionStore>,
    summarizer: Arc<dyn Summarizer>,
    locks: SessionLocks,
    lock_timeout: Duration,
    summarizer_timeout: Duration,
}

impl SummaryCompactor {
    pub fn new(
        store: Arc<dyn SessionStore>,
        summarizer: Arc<dyn Summarizer>,
        locks: SessionLocks,
        lock_timeout: Duration,
        summarizer_timeout: Duration,
    ) -> Self {
        Self {
            store,
            summarizer,
            locks,
            lock_timeout,
            summarizer_timeout,
        }
    }

    /// Fold every turn older than the last `keep_window` into the summary.
    ///
    /// Returns the existing summary unchanged (possibly `None`) when at most
    /// `keep_window` turns are uncovered. On summarizer failure the stored
    /// summary is left as is and `SummarizationFailed` is returned.
    pub async fn ensure_compacted(&self, session_id: &str, keep_window: usize) -> Result<Option<Summary>> {
        let store = Arc::clone(&self.store);
        let summarizer = Arc::clone(&self.summarizer);
        let summarizer_timeout = self.summarizer_timeout;
        let session = session_id.to_string();

        self.locks
            .run_exclusive(session_id, self.lock_timeout, "ensure_compacted", move || async move {
                let snapshot = store.snapshot(&session, TurnSelection::SinceSummary).await?;
                let covered = snapshot.summary.as_ref().map_or(0, |s| s.covered_up_to);
                let keep = keep_window as u64;

                if snapshot.turn_count.saturating_sub(covered) <= keep {
                    return Ok(snapshot.summary);
                }

                let target = snapshot.turn_count - keep;
                let turns: Vec<_> = snapshot
                    .turns
                    .into_iter()
                    .filter(|t| t.index < target)
                    .collect();
                let prior = snapshot.summary.as_ref().map_or("", |s| s.text.as_str());

                let text = match tokio::time::timeout(
                    summarizer_timeout,
                    summarizer.summarize(prior, &turns),
                )
                .await
                {
                    Ok(Ok(text)) if !text.trim().is_empty() => text,
                    Ok(Ok(_)) => {
                        return Err(Error::SummarizationFailed(
                            "summarizer returned empty text".into(),
                        ))
                    }
                    Ok(Err(e)) => return Err(Error::SummarizationFailed(e.to_string())),
                    Err(_) => {
                        return Err(Error::SummarizationFailed(format!(
                            "summarizer timed out after {}ms",
                            summarizer_timeout.as_millis()
                        )))
                    }
                };

                let summary = Summary {
                    text,
                    covered_up_to: target,
                };
                store.put_summary(&session, &summary).await?;

                tracing::info!(
                    session_id = %session,
                    folded = turns.len(),
                    covered_up_to = target,
                    turn_count = snapshot.turn_count,
                    "Summary compacted"
                );

                Ok(Some(summary))
            })
            .await
    }
}
