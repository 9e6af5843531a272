//! Hybrid memory manager.
//!
//! Chooses buffer or summary mode per session from its turn count and
//! composes the turn log, compactor, and metadata store behind the
//! `load`/`save` contract the conversation pipeline consumes.

use chat_common::MemoryConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::compactor::SummaryCompactor;
use crate::error::{Error, Result};
use crate::lock::SessionLocks;
use crate::metadata::MetadataStore;
use crate::sqlite::{SqliteStore, StoreOptions};
use crate::summarizer::Summarizer;
use crate::traits::{SessionStore, TurnSelection};
use crate::turn_log::TurnLog;
use crate::types::{HistoryView, MemoryStats, MemoryView, SessionMode, Summary};

/// Settings fixed at construction; they apply to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryManagerConfig {
    /// Size of the always-visible recent tail
    pub buffer_window: usize,
    /// Turn count at which summary mode engages; must be >= `buffer_window`
    pub summary_threshold: usize,
    /// Max wait for a session's write lock
    pub lock_timeout: Duration,
    /// Max wait for one summarizer call
    pub summarizer_timeout: Duration,
}

impl Default for MemoryManagerConfig {
    fn default() -> Self {
        Self::from(&MemoryConfig::default())
    }
}

impl From<&MemoryConfig> for MemoryManagerConfig {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            buffer_window: config.buffer_window,
            summary_threshold: config.summary_threshold,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
            summarizer_timeout: Duration::from_millis(config.summarizer_timeout_ms),
        }
    }
}

impl MemoryManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.summary_threshold < self.buffer_window {
            return Err(Error::Configuration(format!(
                "summary_threshold ({}) must be >= buffer_window ({})",
                self.summary_threshold, self.buffer_window
            )));
        }
        if self.lock_timeout.is_zero() {
            return Err(Error::Configuration("lock_timeout must be > 0".into()));
        }
        if self.summarizer_timeout.is_zero() {
            return Err(Error::Configuration("summarizer_timeout must be > 0".into()));
        }
        Ok(())
    }
}

/// Session memory façade.
#[derive(Clone)]
pub struct HybridMemory {
    store: Arc<dyn SessionStore>,
    turns: TurnLog,
    metadata: MetadataStore,
    compactor: SummaryCompactor,
    config: MemoryManagerConfig,
}

impl HybridMemory {
    /// Build a manager over an existing store.
    ///
    /// Fails with `Error::Configuration` when the config is inconsistent.
    pub fn new(
        store: Arc<dyn SessionStore>,
        summarizer: Arc<dyn Summarizer>,
        config: MemoryManagerConfig,
    ) -> Result<Self> {
        config.validate()?;

        let locks = SessionLocks::new();
        let turns = TurnLog::new(Arc::clone(&store), locks.clone(), config.lock_timeout);
        let metadata = MetadataStore::new(Arc::clone(&store), locks.clone(), config.lock_timeout);
        let compactor = SummaryCompactor::new(
            Arc::clone(&store),
            summarizer,
            locks,
            config.lock_timeout,
            config.summarizer_timeout,
        );

        tracing::info!(
            backend = store.name(),
            buffer_window = config.buffer_window,
            summary_threshold = config.summary_threshold,
            "Hybrid memory initialized"
        );

        Ok(Self {
            store,
            turns,
            metadata,
            compactor,
            config,
        })
    }

    /// Open a `SQLite` store at `db_path` and build a manager over it.
    pub fn open_sqlite(db_path: &Path, summarizer: Arc<dyn Summarizer>, config: &MemoryConfig) -> Result<Self> {
        let manager_config = MemoryManagerConfig::from(config);
        manager_config.validate()?;

        let store = SqliteStore::with_options(db_path, StoreOptions::from(config))?;
        Self::new(Arc::new(store), summarizer, manager_config)
    }

    /// Open the `SQLite` store configured in `config.db_path` (or the default location).
    pub fn from_config(config: &MemoryConfig, summarizer: Arc<dyn Summarizer>) -> Result<Self> {
        Self::open_sqlite(&config.resolved_db_path(), summarizer, config)
    }

    pub fn config(&self) -> &MemoryManagerConfig {
        &self.config
    }

    pub fn turns(&self) -> &TurnLog {
        &self.turns
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn compactor(&self) -> &SummaryCompactor {
        &self.compactor
    }

    /// Memory view for the pipeline. Never fails.
    ///
    /// Store faults degrade to the view of a fresh session; the fault is
    /// logged at warn.
    pub async fn load(&self, session_id: &str) -> MemoryView {
        match self.try_load(session_id).await {
            Ok(view) => view,
            Err(e) => {
                tracing::warn!(
                    session_id,
                    error = %e,
                    "Memory load failed, serving empty history"
                );
                MemoryView::empty()
            }
        }
    }

    /// Like [`load`](Self::load) but surfaces store faults.
    ///
    /// Buffer mode serves every turn the stored summary does not cover. In
    /// summary mode the session is compacted first. A failed summarizer is
    /// not an error: the view then carries the last valid summary and every
    /// turn it does not cover, with `compaction_skipped` set.
    pub async fn try_load(&self, session_id: &str) -> Result<MemoryView> {
        let snapshot = self.store.snapshot(session_id, TurnSelection::SinceSummary).await?;

        if SessionMode::derive(snapshot.turn_count, self.config.summary_threshold) == SessionMode::Buffer {
            return Ok(MemoryView {
                recent_turns: snapshot.turns,
                summary_text: String::new(),
                metadata: snapshot.metadata,
                mode: SessionMode::Buffer,
                compaction_skipped: false,
            });
        }

        let compaction_skipped = match self
            .compactor
            .ensure_compacted(session_id, self.config.buffer_window)
            .await
        {
            Ok(_) => false,
            Err(e) if e.is_summarization_failed() => {
                tracing::warn!(
                    session_id,
                    turn_count = snapshot.turn_count,
                    error = %e,
                    "Compaction skipped, serving uncompacted turns"
                );
                true
            }
            Err(e) => return Err(e),
        };

        // Turns saved after compaction stay visible: nothing uncovered is dropped.
        let snapshot = self.store.snapshot(session_id, TurnSelection::SinceSummary).await?;
        Ok(MemoryView {
            recent_turns: snapshot.turns,
            summary_text: snapshot.summary.map(|s| s.text).unwrap_or_default(),
            metadata: snapshot.metadata,
            mode: SessionMode::derive(snapshot.turn_count, self.config.summary_threshold),
            compaction_skipped,
        })
    }

    /// Record one exchange. Failures are returned, never swallowed.
    ///
    /// Compaction is not run here; the next `load` (or `compact`) does it.
    pub async fn save(&self, session_id: &str, input: &str, output: &str) -> Result<()> {
        let turn = self.turns.append(session_id, input, output).await?;
        let turn_count = turn.index + 1;

        let before = SessionMode::derive(turn.index, self.config.summary_threshold);
        let after = SessionMode::derive(turn_count, self.config.summary_threshold);
        if before != after {
            tracing::info!(session_id, turn_count, mode = %after, "Session switched mode");
        } else {
            tracing::debug!(session_id, turn_count, mode = %after, "Turn saved");
        }

        Ok(())
    }

    /// Read-only introspection.
    pub async fn stats(&self, session_id: &str) -> Result<MemoryStats> {
        let snapshot = self.store.snapshot(session_id, TurnSelection::Last(0)).await?;

        Ok(MemoryStats {
            turn_count: snapshot.turn_count,
            mode: SessionMode::derive(snapshot.turn_count, self.config.summary_threshold),
            summary_coverage: snapshot.summary.map_or(0, |s| s.covered_up_to),
            buffer_window: self.config.buffer_window,
            summary_threshold: self.config.summary_threshold,
        })
    }

    /// Compact now with the configured window, regardless of mode.
    pub async fn compact(&self, session_id: &str) -> Result<Option<Summary>> {
        self.compactor
            .ensure_compacted(session_id, self.config.buffer_window)
            .await
    }

    /// The last `limit` turns, optionally with the stored summary.
    pub async fn history(&self, session_id: &str, limit: usize, include_summary: bool) -> Result<HistoryView> {
        let snapshot = self.store.snapshot(session_id, TurnSelection::Last(limit)).await?;

        Ok(HistoryView {
            recent_turns: snapshot.turns,
            summary_text: snapshot.summary.filter(|_| include_summary).map(|s| s.text),
            total_turns: snapshot.turn_count,
        })
    }

    pub async fn health_check(&self) -> bool {
        self.store.health_check().await
    }
}
