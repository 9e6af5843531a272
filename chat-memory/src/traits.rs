//! Durable store contract for session memory.

use async_trait::async_trait;

use crate::document::{Document, DocumentUpdate};
use crate::error::Result;
use crate::types::{Summary, Turn};

/// Which turns a [`SessionSnapshot`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSelection {
    /// The last `n` turns
    Last(usize),
    /// Every turn not yet covered by the stored summary
    SinceSummary,
}

/// A consistent read of one session across all relations.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub turn_count: u64,
    pub summary: Option<Summary>,
    pub metadata: Document,
    /// Selected turns, oldest first
    pub turns: Vec<Turn>,
}

/// Durable storage for sessions, turns, summaries, and metadata documents.
///
/// Every write is atomic: it either fully lands or the prior state is kept.
/// Callers serialize writes per session; the store enforces the turn-index
/// and summary-coverage invariants as a backstop.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Backend name (e.g., "sqlite")
    fn name(&self) -> &str;

    /// Persist a turn. `turn.index` must equal the current turn count.
    async fn put_turn(&self, session_id: &str, turn: &Turn) -> Result<()>;

    /// Turns with `index >= from_index` (all when `None`), oldest first.
    async fn get_turns(&self, session_id: &str, from_index: Option<u64>) -> Result<Vec<Turn>>;

    /// The last `limit` turns, oldest first.
    async fn get_recent_turns(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>>;

    /// Total turns ever written for the session.
    async fn count_turns(&self, session_id: &str) -> Result<u64>;

    /// Persist a summary. Coverage may not move backwards.
    async fn put_summary(&self, session_id: &str, summary: &Summary) -> Result<()>;

    async fn get_summary(&self, session_id: &str) -> Result<Option<Summary>>;

    /// Apply one update to the metadata document in a single transaction.
    ///
    /// Returns the update's own result (`false` for a `Remove` that found nothing).
    async fn put_metadata(&self, session_id: &str, update: DocumentUpdate) -> Result<bool>;

    /// The full document; an empty map for unknown sessions.
    async fn get_metadata(&self, session_id: &str) -> Result<Document>;

    /// Read count, summary, metadata, and selected turns in one transaction.
    async fn snapshot(&self, session_id: &str, selection: TurnSelection) -> Result<SessionSnapshot>;

    /// Returns true if the backend answers a trivial query.
    async fn health_check(&self) -> bool;
}
