//! Session memory types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One input/output exchange. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Position in the session, assigned sequentially from 0
    pub index: u64,
    /// User input
    pub input: String,
    /// Assistant output
    pub output: String,
    /// Write timestamp
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Create a turn stamped with the current time.
    pub fn new(index: u64, input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            index,
            input: input.into(),
            output: output.into(),
            created_at: Utc::now(),
        }
    }
}

/// Running summary of the older part of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Summary text
    pub text: String,
    /// Number of leading turns folded into `text`; turns with
    /// `index < covered_up_to` are represented only by the summary.
    /// Never decreases for a session.
    pub covered_up_to: u64,
}

/// How a session's history is served.
///
/// Derived from the turn count on every access, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Raw recent turns, no compression
    Buffer,
    /// Running summary plus a small raw tail
    Summary,
}

impl SessionMode {
    /// Derive the mode from the turn count.
    pub const fn derive(turn_count: u64, summary_threshold: usize) -> Self {
        if turn_count < summary_threshold as u64 {
            Self::Buffer
        } else {
            Self::Summary
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buffer => "buffer",
            Self::Summary => "summary",
        }
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the pipeline receives from `load`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryView {
    /// Verbatim turns, oldest first
    pub recent_turns: Vec<Turn>,
    /// Running summary; empty in buffer mode or before the first compaction
    pub summary_text: String,
    /// Full metadata document
    pub metadata: Value,
    pub mode: SessionMode,
    /// Compaction was due but the summarizer failed; `recent_turns` then holds
    /// every turn not covered by the last valid summary.
    #[serde(default)]
    pub compaction_skipped: bool,
}

impl MemoryView {
    /// The view of a session with no history.
    pub fn empty() -> Self {
        Self {
            recent_turns: Vec::new(),
            summary_text: String::new(),
            metadata: Value::Object(serde_json::Map::new()),
            mode: SessionMode::Buffer,
            compaction_skipped: false,
        }
    }
}

/// Read-only introspection of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub turn_count: u64,
    pub mode: SessionMode,
    /// `covered_up_to` of the current summary, 0 when there is none
    pub summary_coverage: u64,
    pub buffer_window: usize,
    pub summary_threshold: usize,
}

/// Last turns of a session with the optional summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryView {
    pub recent_turns: Vec<Turn>,
    pub summary_text: Option<String>,
    pub total_turns: u64,
}
