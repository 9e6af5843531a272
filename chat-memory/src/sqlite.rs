//! `SQLite`-backed session store.
//!
//! Database layout:
//! - `sessions`: one row per session id, with first/last write times
//! - `turns`: `(session_id, turn_index)` keyed input/output pairs
//! - `summaries`: one running summary per session
//! - `metadata`: one serialized JSON document per session
//!
//! Each call opens its own connection on a blocking worker, so sessions are
//! never serialized behind a shared connection. The database runs in WAL mode:
//! readers see the last committed state while a writer is active.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]

use async_trait::async_trait;
use chat_common::MemoryConfig;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::document::{empty_document, Document, DocumentUpdate};
use crate::error::{Error, Result};
use crate::traits::{SessionSnapshot, SessionStore, TurnSelection};
use crate::types::{Summary, Turn};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    session_id  TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS turns (
    session_id  TEXT NOT NULL,
    turn_index  INTEGER NOT NULL,
    input       TEXT NOT NULL,
    output      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (session_id, turn_index)
);

CREATE TABLE IF NOT EXISTS summaries (
    session_id     TEXT PRIMARY KEY,
    text           TEXT NOT NULL,
    covered_up_to  INTEGER NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metadata (
    session_id  TEXT PRIMARY KEY,
    document    TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
";

/// Timeout and retry policy for store calls.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Upper bound for one call, including time spent waiting on SQLite locks
    pub timeout: Duration,
    /// Immediate retries for busy/locked faults
    pub max_retries: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 2,
        }
    }
}

impl From<&MemoryConfig> for StoreOptions {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.store_timeout_ms),
            max_retries: config.max_retries,
        }
    }
}

/// `SQLite` session store.
pub struct SqliteStore {
    db_path: PathBuf,
    options: StoreOptions,
}

impl SqliteStore {
    /// Open (or create) a store at the given database path.
    pub fn new(db_path: &Path) -> Result<Self> {
        Self::with_options(db_path, StoreOptions::default())
    }

    /// Open (or create) a store with an explicit timeout/retry policy.
    ///
    /// A zero timeout is rejected before anything is created on disk.
    pub fn with_options(db_path: &Path, options: StoreOptions) -> Result<Self> {
        if options.timeout.is_zero() {
            return Err(Error::Configuration("store timeout must be > 0".into()));
        }

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::store_unavailable("open", format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = open_connection(db_path, options.timeout).sql_context("open")?;
        conn.execute_batch(SCHEMA).sql_context("open")?;

        tracing::debug!(path = %db_path.display(), "Session store ready");

        Ok(Self {
            db_path: db_path.to_path_buf(),
            options,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run `work` on a fresh connection in a blocking worker.
    ///
    /// Bounded by `options.timeout`; transient faults are retried up to
    /// `options.max_retries` times, everything else is returned as is.
    async fn run<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&mut Connection) -> Result<T> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let mut attempt = 0;

        loop {
            let db_path = self.db_path.clone();
            let busy_timeout = self.options.timeout / 2;
            let work = Arc::clone(&work);

            let task = tokio::task::spawn_blocking(move || -> Result<T> {
                let mut conn = open_connection(&db_path, busy_timeout).sql_context(operation)?;
                (*work)(&mut conn)
            });

            let result = match tokio::time::timeout(self.options.timeout, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(Error::store_unavailable(
                    operation,
                    format!("store worker failed: {e}"),
                )),
                Err(_) => Err(Error::store_unavailable(
                    operation,
                    format!("timed out after {}ms", self.options.timeout.as_millis()),
                )),
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.options.max_retries => {
                    attempt += 1;
                    tracing::debug!(operation, attempt, error = %e, "Retrying transient store fault");
                }
                other => return other,
            }
        }
    }
}

fn open_connection(db_path: &Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

/// Map `rusqlite` errors into the memory error taxonomy.
trait SqlResultExt<T> {
    fn sql_context(self, operation: &'static str) -> Result<T>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn sql_context(self, operation: &'static str) -> Result<T> {
        self.map_err(|e| classify(operation, e))
    }
}

fn classify(operation: &'static str, e: rusqlite::Error) -> Error {
    let code = match &e {
        rusqlite::Error::SqliteFailure(failure, _) => Some(failure.code),
        _ => None,
    };

    match code {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Error::StoreUnavailable {
            operation,
            reason: e.to_string(),
            transient: true,
        },
        Some(ErrorCode::ConstraintViolation) => Error::Conflict {
            operation,
            reason: e.to_string(),
        },
        _ => Error::store_unavailable(operation, e.to_string()),
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn touch_session(conn: &Connection, session_id: &str, now: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO sessions (session_id, created_at, updated_at)
         VALUES (?1, ?2, ?2)
         ON CONFLICT(session_id) DO UPDATE SET updated_at = excluded.updated_at",
        params![session_id, now],
    )?;
    Ok(())
}

fn turn_from_row(row: &Row<'_>) -> rusqlite::Result<Turn> {
    let created_at: String = row.get(3)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(Turn {
        index: row.get::<_, i64>(0)? as u64,
        input: row.get(1)?,
        output: row.get(2)?,
        created_at,
    })
}

fn count_in(conn: &Connection, session_id: &str) -> rusqlite::Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM turns WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

fn turns_from_in(conn: &Connection, session_id: &str, from_index: u64) -> rusqlite::Result<Vec<Turn>> {
    let mut stmt = conn.prepare(
        "SELECT turn_index, input, output, created_at
         FROM turns
         WHERE session_id = ?1 AND turn_index >= ?2
         ORDER BY turn_index ASC",
    )?;
    let rows = stmt.query_map(params![session_id, from_index as i64], turn_from_row)?;
    rows.collect()
}

fn recent_in(conn: &Connection, session_id: &str, limit: usize) -> rusqlite::Result<Vec<Turn>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT turn_index, input, output, created_at
         FROM turns
         WHERE session_id = ?1
         ORDER BY turn_index DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![session_id, limit as i64], turn_from_row)?;
    let mut turns = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    turns.reverse();
    Ok(turns)
}

fn summary_in(conn: &Connection, session_id: &str) -> rusqlite::Result<Option<Summary>> {
    conn.query_row(
        "SELECT text, covered_up_to FROM summaries WHERE session_id = ?1",
        params![session_id],
        |row| {
            Ok(Summary {
                text: row.get(0)?,
                covered_up_to: row.get::<_, i64>(1)? as u64,
            })
        },
    )
    .optional()
}

fn metadata_in(conn: &Connection, session_id: &str, operation: &'static str) -> Result<Document> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT document FROM metadata WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .optional()
        .sql_context(operation)?;

    match raw {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(empty_document()),
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn put_turn(&self, session_id: &str, turn: &Turn) -> Result<()> {
        const OP: &str = "put_turn";
        let session_id = session_id.to_string();
        let turn = turn.clone();

        self.run(OP, move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .sql_context(OP)?;

            let count = count_in(&tx, &session_id).sql_context(OP)?;
            if turn.index != count {
                return Err(Error::Conflict {
                    operation: OP,
                    reason: format!(
                        "turn index {} does not follow {count} stored turns",
                        turn.index
                    ),
                });
            }

            touch_session(&tx, &session_id, &now_rfc3339()).sql_context(OP)?;
            tx.execute(
                "INSERT INTO turns (session_id, turn_index, input, output, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session_id,
                    turn.index as i64,
                    turn.input,
                    turn.output,
                    turn.created_at.to_rfc3339()
                ],
            )
            .sql_context(OP)?;

            tx.commit().sql_context(OP)
        })
        .await
    }

    async fn get_turns(&self, session_id: &str, from_index: Option<u64>) -> Result<Vec<Turn>> {
        const OP: &str = "get_turns";
        let session_id = session_id.to_string();
        let from_index = from_index.unwrap_or(0);

        self.run(OP, move |conn| {
            turns_from_in(conn, &session_id, from_index).sql_context(OP)
        })
        .await
    }

    async fn get_recent_turns(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>> {
        const OP: &str = "get_recent_turns";
        let session_id = session_id.to_string();

        self.run(OP, move |conn| recent_in(conn, &session_id, limit).sql_context(OP))
            .await
    }

    async fn count_turns(&self, session_id: &str) -> Result<u64> {
        const OP: &str = "count_turns";
        let session_id = session_id.to_string();

        self.run(OP, move |conn| count_in(conn, &session_id).sql_context(OP))
            .await
    }

    async fn put_summary(&self, session_id: &str, summary: &Summary) -> Result<()> {
        const OP: &str = "put_summary";
        let session_id = session_id.to_string();
        let summary = summary.clone();

        self.run(OP, move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .sql_context(OP)?;

            let count = count_in(&tx, &session_id).sql_context(OP)?;
            if summary.covered_up_to > count {
                return Err(Error::Conflict {
                    operation: OP,
                    reason: format!(
                        "summary covers {} turns but only {count} exist",
                        summary.covered_up_to
                    ),
                });
            }

            let now = now_rfc3339();
            let changed = tx
                .execute(
                    "INSERT INTO summaries (session_id, text, covered_up_to, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(session_id) DO UPDATE SET
                        text = excluded.text,
                        covered_up_to = excluded.covered_up_to,
                        updated_at = excluded.updated_at
                     WHERE excluded.covered_up_to >= summaries.covered_up_to",
                    params![session_id, summary.text, summary.covered_up_to as i64, now],
                )
                .sql_context(OP)?;

            if changed == 0 {
                return Err(Error::Conflict {
                    operation: OP,
                    reason: format!(
                        "summary coverage {} is behind the stored summary",
                        summary.covered_up_to
                    ),
                });
            }

            touch_session(&tx, &session_id, &now).sql_context(OP)?;
            tx.commit().sql_context(OP)
        })
        .await
    }

    async fn get_summary(&self, session_id: &str) -> Result<Option<Summary>> {
        const OP: &str = "get_summary";
        let session_id = session_id.to_string();

        self.run(OP, move |conn| summary_in(conn, &session_id).sql_context(OP))
            .await
    }

    async fn put_metadata(&self, session_id: &str, update: DocumentUpdate) -> Result<bool> {
        const OP: &str = "put_metadata";
        let session_id = session_id.to_string();

        self.run(OP, move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .sql_context(OP)?;

            let mut document = metadata_in(&tx, &session_id, OP)?;
            if !update.clone().apply(&mut document)? {
                return Ok(false);
            }

            let now = now_rfc3339();
            tx.execute(
                "INSERT INTO metadata (session_id, document, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET
                    document = excluded.document,
                    updated_at = excluded.updated_at",
                params![session_id, serde_json::to_string(&document)?, now],
            )
            .sql_context(OP)?;
            touch_session(&tx, &session_id, &now).sql_context(OP)?;

            tx.commit().sql_context(OP)?;
            Ok(true)
        })
        .await
    }

    async fn get_metadata(&self, session_id: &str) -> Result<Document> {
        const OP: &str = "get_metadata";
        let session_id = session_id.to_string();

        self.run(OP, move |conn| metadata_in(conn, &session_id, OP)).await
    }

    async fn snapshot(&self, session_id: &str, selection: TurnSelection) -> Result<SessionSnapshot> {
        const OP: &str = "snapshot";
        let session_id = session_id.to_string();

        self.run(OP, move |conn| {
            let tx = conn.transaction().sql_context(OP)?;

            let turn_count = count_in(&tx, &session_id).sql_context(OP)?;
            let summary = summary_in(&tx, &session_id).sql_context(OP)?;
            let metadata = metadata_in(&tx, &session_id, OP)?;
            let turns = match selection {
                TurnSelection::Last(n) => recent_in(&tx, &session_id, n),
                TurnSelection::SinceSummary => {
                    let from = summary.as_ref().map_or(0, |s| s.covered_up_to);
                    turns_from_in(&tx, &session_id, from)
                }
            }
            .sql_context(OP)?;

            tx.commit().sql_context(OP)?;

            Ok(SessionSnapshot {
                turn_count,
                summary,
                metadata,
                turns,
            })
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.run("health_check", |conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .sql_context("health_check")
        })
        .await
        .is_ok()
    }
}
