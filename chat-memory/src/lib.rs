//! Chat Memory - Hybrid session memory for conversational pipelines.
//!
//! Each session keeps:
//! - An append-only turn log, served verbatim through a recent window
//! - A running summary of older turns, produced by an injected summarizer
//! - A free-form metadata document addressed by dot-paths
//!
//! ## Architecture
//!
//! ```text
//!              ┌── TurnLog ──────────┐
//! HybridMemory ├── SummaryCompactor ─┼── SessionLocks ── SessionStore (SQLite)
//!              └── MetadataStore ────┘
//! ```
//!
//! Short sessions are served in buffer mode (raw turns). Once a session
//! reaches `summary_threshold` turns it is served in summary mode: the
//! summary plus the last `buffer_window` turns. The mode is derived from
//! the turn count on every access and never stored.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod compactor;
pub mod document;
pub mod error;
pub mod lock;
pub mod manager;
pub mod metadata;
pub mod provider;
pub mod sqlite;
pub mod summarizer;
pub mod traits;
pub mod turn_log;
pub mod types;

// Re-export commonly used types
pub use compactor::SummaryCompactor;
pub use document::{DocPath, Document, DocumentUpdate};
pub use error::{Error, Result};
pub use lock::SessionLocks;
pub use manager::{HybridMemory, MemoryManagerConfig};
pub use metadata::{LoanVariables, MetadataStore};
pub use provider::{GenerationParams, Provider};
pub use sqlite::{SqliteStore, StoreOptions};
pub use summarizer::{LlmSummarizer, Summarizer};
pub use traits::{SessionSnapshot, SessionStore, TurnSelection};
pub use turn_log::TurnLog;
pub use types::{HistoryView, MemoryStats, MemoryView, SessionMode, Summary, Turn};
