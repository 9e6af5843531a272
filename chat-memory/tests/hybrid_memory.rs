//! Integration tests for the hybrid memory manager.
//!
//! Exercises the public API end to end over an on-disk SQLite store.

use async_trait::async_trait;
use chat_memory::{
    Document, DocumentUpdate, Error, HybridMemory, MemoryManagerConfig, MemoryView, SessionMode,
    SessionSnapshot, SessionStore, SqliteStore, Summarizer, Summary, Turn, TurnSelection,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Joins the inputs it is given onto the prior summary.
#[derive(Default)]
struct JoiningSummarizer {
    fail: AtomicBool,
    calls: AtomicUsize,
}

#[async_trait]
impl Summarizer for JoiningSummarizer {
    async fn summarize(&self, prior: &str, turns: &[Turn]) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("summarizer offline");
        }
        let mut parts: Vec<&str> = Vec::new();
        if !prior.is_empty() {
            parts.push(prior);
        }
        parts.extend(turns.iter().map(|t| t.input.as_str()));
        Ok(parts.join(" "))
    }
}

fn manager_config(buffer_window: usize, summary_threshold: usize) -> MemoryManagerConfig {
    MemoryManagerConfig {
        buffer_window,
        summary_threshold,
        lock_timeout: Duration::from_secs(10),
        summarizer_timeout: Duration::from_secs(2),
    }
}

fn open(
    path: &Path,
    summarizer: Arc<JoiningSummarizer>,
    buffer_window: usize,
    summary_threshold: usize,
) -> HybridMemory {
    let store = SqliteStore::new(path).unwrap();
    HybridMemory::new(
        Arc::new(store),
        summarizer,
        manager_config(buffer_window, summary_threshold),
    )
    .unwrap()
}

async fn save_n(memory: &HybridMemory, session_id: &str, n: usize) {
    for i in 1..=n {
        memory
            .save(session_id, &format!("m{i}"), &format!("r{i}"))
            .await
            .unwrap();
    }
}

fn inputs(turns: &[Turn]) -> Vec<&str> {
    turns.iter().map(|t| t.input.as_str()).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Turn log
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sequential_appends_are_counted_in_order() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp.path().join("m.db"), Arc::default(), 10, 15);

    save_n(&memory, "s1", 8).await;

    assert_eq!(memory.turns().count("s1").await.unwrap(), 8);
    let recent = memory.turns().recent("s1", 8).await.unwrap();
    assert_eq!(inputs(&recent), ["m1", "m2", "m3", "m4", "m5", "m6", "m7", "m8"]);
    assert_eq!(recent[7].output, "r8");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_have_no_gaps() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp.path().join("m.db"), Arc::default(), 10, 15);

    let mut handles = Vec::new();
    for i in 0..50 {
        let memory = memory.clone();
        handles.push(tokio::spawn(async move {
            memory.save("shared", &format!("q{i}"), &format!("a{i}")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let turns = memory.turns().since("shared", 0).await.unwrap();
    assert_eq!(turns.len(), 50);
    assert_eq!(
        turns.iter().map(|t| t.index).collect::<Vec<_>>(),
        (0..50).collect::<Vec<u64>>()
    );
}

#[tokio::test]
async fn test_abandoned_save_is_all_or_nothing() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp.path().join("m.db"), Arc::default(), 10, 15);

    let _ = tokio::time::timeout(Duration::from_micros(1), memory.save("s1", "first", "one")).await;
    memory.save("s1", "second", "two").await.unwrap();

    let turns = memory.turns().since("s1", 0).await.unwrap();
    assert!(turns.len() == 1 || turns.len() == 2);
    for (i, turn) in turns.iter().enumerate() {
        assert_eq!(turn.index, i as u64);
        assert!(!turn.output.is_empty());
    }
    assert_eq!(turns.last().unwrap().input, "second");
}

// ─────────────────────────────────────────────────────────────────────────────
// Modes and compaction
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_threshold_boundary_flips_mode() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp.path().join("m.db"), Arc::default(), 5, 5);

    save_n(&memory, "s1", 4).await;
    let view = memory.load("s1").await;
    assert_eq!(view.mode, SessionMode::Buffer);
    assert_eq!(view.recent_turns.len(), 4);
    assert!(view.summary_text.is_empty());

    save_n(&memory, "s1", 1).await;
    let view = memory.load("s1").await;
    assert_eq!(view.mode, SessionMode::Summary);
    assert_eq!(view.recent_turns.len(), 5);
}

#[tokio::test]
async fn test_buffer_mode_serves_turns_beyond_window() {
    let tmp = TempDir::new().unwrap();
    let summarizer = Arc::new(JoiningSummarizer::default());
    let memory = open(&tmp.path().join("m.db"), summarizer.clone(), 10, 15);

    save_n(&memory, "s1", 14).await;
    let view = memory.load("s1").await;

    assert_eq!(view.mode, SessionMode::Buffer);
    assert!(view.summary_text.is_empty());
    assert_eq!(view.recent_turns.len(), 14);
    assert_eq!(view.recent_turns[0].input, "m1");
    assert_eq!(view.recent_turns[13].input, "m14");
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_summary_mode_folds_older_turns() {
    let tmp = TempDir::new().unwrap();
    let summarizer = Arc::new(JoiningSummarizer::default());
    let memory = open(&tmp.path().join("m.db"), summarizer.clone(), 3, 5);

    save_n(&memory, "s1", 7).await;
    let view = memory.load("s1").await;

    assert_eq!(view.mode, SessionMode::Summary);
    assert!(!view.compaction_skipped);
    assert_eq!(view.summary_text, "m1 m2 m3 m4");
    assert_eq!(inputs(&view.recent_turns), ["m5", "m6", "m7"]);

    let stats = memory.stats("s1").await.unwrap();
    assert_eq!(stats.turn_count, 7);
    assert_eq!(stats.summary_coverage, 4);
    assert_eq!(stats.buffer_window, 3);
    assert_eq!(stats.summary_threshold, 5);

    // Nothing new to fold
    memory.load("s1").await;
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_save_does_not_compact() {
    let tmp = TempDir::new().unwrap();
    let summarizer = Arc::new(JoiningSummarizer::default());
    let memory = open(&tmp.path().join("m.db"), summarizer.clone(), 2, 3);

    save_n(&memory, "s1", 6).await;

    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    let stats = memory.stats("s1").await.unwrap();
    assert_eq!(stats.mode, SessionMode::Summary);
    assert_eq!(stats.summary_coverage, 0);

    let summary = memory.compact("s1").await.unwrap().unwrap();
    assert_eq!(summary.covered_up_to, 4);
}

#[tokio::test]
async fn test_stats_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp.path().join("m.db"), Arc::default(), 3, 5);

    save_n(&memory, "s1", 9).await;
    memory.load("s1").await;

    let first = memory.stats("s1").await.unwrap();
    let second = memory.stats("s1").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.summary_coverage, 6);
}

#[tokio::test]
async fn test_coverage_is_monotonic_across_loads() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp.path().join("m.db"), Arc::default(), 3, 5);

    let mut last = 0;
    for _ in 0..12 {
        save_n(&memory, "s1", 1).await;
        memory.load("s1").await;
        let coverage = memory.stats("s1").await.unwrap().summary_coverage;
        assert!(coverage >= last);
        last = coverage;
    }
    assert_eq!(last, 9);
}

#[tokio::test]
async fn test_summarizer_failure_serves_uncompacted_turns() {
    let tmp = TempDir::new().unwrap();
    let summarizer = Arc::new(JoiningSummarizer::default());
    let memory = open(&tmp.path().join("m.db"), summarizer.clone(), 3, 5);

    save_n(&memory, "s1", 7).await;
    memory.load("s1").await;
    assert_eq!(memory.stats("s1").await.unwrap().summary_coverage, 4);

    summarizer.fail.store(true, Ordering::SeqCst);
    for i in 8..=10 {
        memory.save("s1", &format!("m{i}"), "r").await.unwrap();
    }

    let view = memory.load("s1").await;
    assert!(view.compaction_skipped);
    assert_eq!(view.mode, SessionMode::Summary);
    assert_eq!(view.summary_text, "m1 m2 m3 m4");
    assert_eq!(inputs(&view.recent_turns), ["m5", "m6", "m7", "m8", "m9", "m10"]);

    // Stored summary untouched
    assert_eq!(memory.stats("s1").await.unwrap().summary_coverage, 4);

    summarizer.fail.store(false, Ordering::SeqCst);
    let view = memory.load("s1").await;
    assert!(!view.compaction_skipped);
    assert_eq!(inputs(&view.recent_turns), ["m8", "m9", "m10"]);
    assert_eq!(memory.stats("s1").await.unwrap().summary_coverage, 7);
}

#[tokio::test]
async fn test_failure_before_first_summary() {
    let tmp = TempDir::new().unwrap();
    let summarizer = Arc::new(JoiningSummarizer::default());
    summarizer.fail.store(true, Ordering::SeqCst);
    let memory = open(&tmp.path().join("m.db"), summarizer, 3, 5);

    save_n(&memory, "s1", 7).await;
    let view = memory.load("s1").await;

    assert!(view.compaction_skipped);
    assert!(view.summary_text.is_empty());
    assert_eq!(view.recent_turns.len(), 7);
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_metadata_roundtrip_and_view() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp.path().join("m.db"), Arc::default(), 10, 15);

    memory.metadata().set_path("s1", "a.b.c", json!(42)).await.unwrap();
    assert_eq!(
        memory.metadata().get_path("s1", "a.b.c", Value::Null).await.unwrap(),
        json!(42)
    );
    assert_eq!(
        memory.metadata().get_path("s1", "a.b.x", json!("default")).await.unwrap(),
        json!("default")
    );

    memory.metadata().add_reason("s1", "car").await.unwrap();
    let view = memory.load("s1").await;
    assert_eq!(view.metadata, json!({"a": {"b": {"c": 42}}, "reasons": ["car"]}));
}

#[tokio::test]
async fn test_state_survives_new_manager_instance() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("m.db");

    let (stats, recent, value) = {
        let memory = open(&path, Arc::default(), 3, 5);
        save_n(&memory, "s1", 8).await;
        memory.load("s1").await;
        memory.metadata().set_path("s1", "user_info.name", json!("Ana")).await.unwrap();
        (
            memory.stats("s1").await.unwrap(),
            memory.turns().recent("s1", 3).await.unwrap(),
            memory.metadata().get_path("s1", "user_info.name", Value::Null).await.unwrap(),
        )
    };

    let memory = open(&path, Arc::default(), 3, 5);
    assert_eq!(memory.stats("s1").await.unwrap(), stats);
    assert_eq!(memory.turns().recent("s1", 3).await.unwrap(), recent);
    assert_eq!(
        memory.metadata().get_path("s1", "user_info.name", Value::Null).await.unwrap(),
        value
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Compaction races
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite store that appends one extra turn right after a summary is
/// written, as a concurrent `save` landing between compaction and the read.
struct LateSaveStore {
    inner: SqliteStore,
    pending: AtomicBool,
}

#[async_trait]
impl SessionStore for LateSaveStore {
    fn name(&self) -> &str {
        "late-save"
    }

    async fn put_turn(&self, session_id: &str, turn: &Turn) -> chat_memory::Result<()> {
        self.inner.put_turn(session_id, turn).await
    }

    async fn get_turns(&self, session_id: &str, from_index: Option<u64>) -> chat_memory::Result<Vec<Turn>> {
        self.inner.get_turns(session_id, from_index).await
    }

    async fn get_recent_turns(&self, session_id: &str, limit: usize) -> chat_memory::Result<Vec<Turn>> {
        self.inner.get_recent_turns(session_id, limit).await
    }

    async fn count_turns(&self, session_id: &str) -> chat_memory::Result<u64> {
        self.inner.count_turns(session_id).await
    }

    async fn put_summary(&self, session_id: &str, summary: &Summary) -> chat_memory::Result<()> {
        self.inner.put_summary(session_id, summary).await?;
        self.pending.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_summary(&self, session_id: &str) -> chat_memory::Result<Option<Summary>> {
        self.inner.get_summary(session_id).await
    }

    async fn put_metadata(&self, session_id: &str, update: DocumentUpdate) -> chat_memory::Result<bool> {
        self.inner.put_metadata(session_id, update).await
    }

    async fn get_metadata(&self, session_id: &str) -> chat_memory::Result<Document> {
        self.inner.get_metadata(session_id).await
    }

    async fn snapshot(
        &self,
        session_id: &str,
        selection: TurnSelection,
    ) -> chat_memory::Result<SessionSnapshot> {
        if self.pending.swap(false, Ordering::SeqCst) {
            let count = self.inner.count_turns(session_id).await?;
            self.inner
                .put_turn(session_id, &Turn::new(count, "late", "r"))
                .await?;
        }
        self.inner.snapshot(session_id, selection).await
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }
}

#[tokio::test]
async fn test_turn_saved_after_compaction_is_not_hidden() {
    let tmp = TempDir::new().unwrap();
    let store = LateSaveStore {
        inner: SqliteStore::new(&tmp.path().join("m.db")).unwrap(),
        pending: AtomicBool::new(false),
    };
    let memory = HybridMemory::new(
        Arc::new(store),
        Arc::new(JoiningSummarizer::default()),
        manager_config(3, 5),
    )
    .unwrap();

    save_n(&memory, "s1", 7).await;
    let view = memory.try_load("s1").await.unwrap();

    assert_eq!(view.summary_text, "m1 m2 m3 m4");
    assert_eq!(inputs(&view.recent_turns), ["m5", "m6", "m7", "late"]);
    assert_eq!(memory.stats("s1").await.unwrap().turn_count, 8);
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_threshold_below_window_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::new(&tmp.path().join("m.db")).unwrap();

    let result = HybridMemory::new(
        Arc::new(store),
        Arc::new(JoiningSummarizer::default()),
        manager_config(10, 5),
    );
    assert!(matches!(result, Err(Error::Configuration(_))));
}

/// Store whose every call fails as if the database were unreachable.
struct UnreachableStore;

fn unreachable(operation: &'static str) -> Error {
    Error::store_unavailable(operation, "connection refused")
}

#[async_trait]
impl SessionStore for UnreachableStore {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn put_turn(&self, _session_id: &str, _turn: &Turn) -> chat_memory::Result<()> {
        Err(unreachable("put_turn"))
    }

    async fn get_turns(&self, _session_id: &str, _from_index: Option<u64>) -> chat_memory::Result<Vec<Turn>> {
        Err(unreachable("get_turns"))
    }

    async fn get_recent_turns(&self, _session_id: &str, _limit: usize) -> chat_memory::Result<Vec<Turn>> {
        Err(unreachable("get_recent_turns"))
    }

    async fn count_turns(&self, _session_id: &str) -> chat_memory::Result<u64> {
        Err(unreachable("count_turns"))
    }

    async fn put_summary(&self, _session_id: &str, _summary: &Summary) -> chat_memory::Result<()> {
        Err(unreachable("put_summary"))
    }

    async fn get_summary(&self, _session_id: &str) -> chat_memory::Result<Option<Summary>> {
        Err(unreachable("get_summary"))
    }

    async fn put_metadata(&self, _session_id: &str, _update: DocumentUpdate) -> chat_memory::Result<bool> {
        Err(unreachable("put_metadata"))
    }

    async fn get_metadata(&self, _session_id: &str) -> chat_memory::Result<Document> {
        Err(unreachable("get_metadata"))
    }

    async fn snapshot(
        &self,
        _session_id: &str,
        _selection: TurnSelection,
    ) -> chat_memory::Result<SessionSnapshot> {
        Err(unreachable("snapshot"))
    }

    async fn health_check(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn test_store_failure_degrades_load_but_not_save() {
    let memory = HybridMemory::new(
        Arc::new(UnreachableStore),
        Arc::new(JoiningSummarizer::default()),
        manager_config(3, 5),
    )
    .unwrap();

    assert_eq!(memory.load("s1").await, MemoryView::empty());
    assert!(memory.try_load("s1").await.unwrap_err().is_store_unavailable());

    let err = memory.save("s1", "hi", "hello").await.unwrap_err();
    assert!(err.is_store_unavailable());
    assert!(!memory.health_check().await);
}
