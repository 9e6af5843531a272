//! Per-session metadata documents.
//!
//! Generic dot-path access plus named accessors for the fields the
//! conversation pipeline tracks (user info, objective, reasons, loan
//! variables). The accessors are plain reads and writes at fixed paths and
//! hold no state of their own.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::document::{get_path, DocPath, Document, DocumentUpdate};
use crate::error::{Error, Result};
use crate::lock::SessionLocks;
use crate::traits::SessionStore;

const USER_INFO: &str = "user_info";
const CONVERSATION_OBJECTIVE: &str = "conversation_objective";
const CONVERSATION_STATE: &str = "conversation_state";
const WELCOME_DONE: &str = "welcome_done";
const REASONS: &str = "reasons";
const REASONS_CONFIRMED: &str = "reasons_confirmed";
const VARS_INFO_GIVEN: &str = "vars_info_given";
const VARS: &str = "vars";

/// The three loan figures collected during a conversation.
///
/// Values are kept as stored, so `"1200"` and `1200` are both a recorded
/// monthly figure. `None` means absent or `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanVariables {
    /// Monthly payment
    #[serde(default)]
    pub monthly: Option<Value>,
    /// Term in months
    #[serde(default)]
    pub duration: Option<Value>,
    /// Interest rate
    #[serde(default)]
    pub rate: Option<Value>,
}

impl LoanVariables {
    pub fn is_complete(&self) -> bool {
        self.monthly.is_some() && self.duration.is_some() && self.rate.is_some()
    }
}

fn default_vars() -> Value {
    json!({"monthly": null, "duration": null, "rate": null})
}

fn root_mut(doc: &mut Document) -> Result<&mut Map<String, Value>> {
    doc.as_object_mut()
        .ok_or_else(|| Error::InvalidDocument("document root must be a map".into()))
}

/// The `vars` map, seeded with all-null figures when absent or null.
fn vars_mut(doc: &mut Document) -> Result<&mut Map<String, Value>> {
    let slot = root_mut(doc)?.entry(VARS).or_insert_with(default_vars);
    if slot.is_null() {
        *slot = default_vars();
    }
    slot.as_object_mut().ok_or_else(|| Error::InvalidPath {
        path: VARS.into(),
        reason: "existing value is not a map".into(),
    })
}

fn non_null(vars: &Value, key: &str) -> Option<Value> {
    vars.get(key).filter(|v| !v.is_null()).cloned()
}

/// Metadata document access for all sessions of one store.
#[derive(Clone)]
pub struct MetadataStore {
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
    lock_timeout: Duration,
}

impl MetadataStore {
    pub fn new(store: Arc<dyn SessionStore>, locks: SessionLocks, lock_timeout: Duration) -> Self {
        Self {
            store,
            locks,
            lock_timeout,
        }
    }

    // ------------------------------------------------------------------
    // Generic document access
    // ------------------------------------------------------------------

    /// The full document; `{}` for a session with no metadata.
    pub async fn get(&self, session_id: &str) -> Result<Document> {
        self.store.get_metadata(session_id).await
    }

    /// The value at `path`, or `None` when absent.
    pub async fn lookup(&self, session_id: &str, path: &str) -> Result<Option<Value>> {
        let path = DocPath::parse(path)?;
        let doc = self.store.get_metadata(session_id).await?;
        Ok(get_path(&doc, &path).cloned())
    }

    /// The value at `path`, or `default` when absent.
    ///
    /// A stored `null` is returned as `null`, not replaced by `default`.
    pub async fn get_path(&self, session_id: &str, path: &str, default: Value) -> Result<Value> {
        Ok(self.lookup(session_id, path).await?.unwrap_or(default))
    }

    pub async fn set_path(&self, session_id: &str, path: &str, value: Value) -> Result<()> {
        let path = DocPath::parse(path)?;
        self.update(session_id, "set_path", DocumentUpdate::Set { path, value })
            .await
            .map(drop)
    }

    /// Deep-merge `partial` into the document. Lists are replaced, not joined.
    pub async fn merge(&self, session_id: &str, partial: Value) -> Result<()> {
        self.update(session_id, "merge", DocumentUpdate::Merge { partial })
            .await
            .map(drop)
    }

    /// Remove the value at `path`. Returns whether anything was there.
    pub async fn remove_path(&self, session_id: &str, path: &str) -> Result<bool> {
        let path = DocPath::parse(path)?;
        self.update(session_id, "remove_path", DocumentUpdate::Remove { path })
            .await
    }

    async fn update(&self, session_id: &str, operation: &'static str, update: DocumentUpdate) -> Result<bool> {
        let store = Arc::clone(&self.store);
        let session = session_id.to_string();

        self.locks
            .run_exclusive(session_id, self.lock_timeout, operation, move || async move {
                store.put_metadata(&session, update).await
            })
            .await
    }

    /// Read-modify-write under the session lock.
    ///
    /// `edit` returns whether it changed anything; unchanged documents are
    /// not written back.
    async fn modify<F>(&self, session_id: &str, operation: &'static str, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut Document) -> Result<bool> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let session = session_id.to_string();

        self.locks
            .run_exclusive(session_id, self.lock_timeout, operation, move || async move {
                let mut document = store.get_metadata(&session).await?;
                if !edit(&mut document)? {
                    return Ok(false);
                }
                store
                    .put_metadata(&session, DocumentUpdate::Replace { document })
                    .await?;
                Ok(true)
            })
            .await
    }

    async fn get_flag(&self, session_id: &str, path: &str) -> Result<bool> {
        let value = self.get_path(session_id, path, Value::Bool(false)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn get_map(&self, session_id: &str, path: &str) -> Result<Value> {
        match self.lookup(session_id, path).await? {
            Some(Value::Null) | None => Ok(json!({})),
            Some(value) => Ok(value),
        }
    }

    // ------------------------------------------------------------------
    // User and conversation
    // ------------------------------------------------------------------

    pub async fn set_user_info(&self, session_id: &str, info: Value) -> Result<()> {
        self.set_path(session_id, USER_INFO, info).await
    }

    /// `{}` when nothing was recorded.
    pub async fn get_user_info(&self, session_id: &str) -> Result<Value> {
        self.get_map(session_id, USER_INFO).await
    }

    pub async fn set_conversation_objective(&self, session_id: &str, objective: &str) -> Result<()> {
        self.set_path(session_id, CONVERSATION_OBJECTIVE, Value::String(objective.to_string()))
            .await
    }

    pub async fn get_conversation_objective(&self, session_id: &str) -> Result<Option<String>> {
        let value = self.lookup(session_id, CONVERSATION_OBJECTIVE).await?;
        Ok(value.and_then(|v| v.as_str().map(str::to_string)))
    }

    pub async fn clear_conversation_objective(&self, session_id: &str) -> Result<bool> {
        self.remove_path(session_id, CONVERSATION_OBJECTIVE).await
    }

    pub async fn set_conversation_state(&self, session_id: &str, state: Value) -> Result<()> {
        self.set_path(session_id, CONVERSATION_STATE, state).await
    }

    pub async fn get_conversation_state(&self, session_id: &str) -> Result<Value> {
        self.get_map(session_id, CONVERSATION_STATE).await
    }

    /// Set one key of the conversation state, keeping the others.
    pub async fn update_conversation_state(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        let path = DocPath::parse(&format!("{CONVERSATION_STATE}.{key}"))?;
        if path.segments().len() != 2 {
            return Err(Error::InvalidPath {
                path: key.to_string(),
                reason: "state key must be a single segment".into(),
            });
        }
        self.update(session_id, "update_conversation_state", DocumentUpdate::Set { path, value })
            .await
            .map(drop)
    }

    pub async fn set_welcome_done(&self, session_id: &str, done: bool) -> Result<()> {
        self.set_path(session_id, WELCOME_DONE, Value::Bool(done)).await
    }

    pub async fn is_welcome_done(&self, session_id: &str) -> Result<bool> {
        self.get_flag(session_id, WELCOME_DONE).await
    }

    // ------------------------------------------------------------------
    // Reasons
    // ------------------------------------------------------------------

    pub async fn set_reasons(&self, session_id: &str, reasons: &[String]) -> Result<()> {
        self.set_path(session_id, REASONS, json!(reasons)).await
    }

    /// Stored reasons in insertion order. Non-string entries are skipped.
    pub async fn get_reasons(&self, session_id: &str) -> Result<Vec<String>> {
        let value = self.lookup(session_id, REASONS).await?;
        Ok(match value {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        })
    }

    /// Append a reason unless it is already listed. Returns whether it was added.
    pub async fn add_reason(&self, session_id: &str, reason: &str) -> Result<bool> {
        let reason = reason.to_string();
        self.modify(session_id, "add_reason", move |doc| {
            let slot = root_mut(doc)?
                .entry(REASONS)
                .or_insert_with(|| Value::Array(Vec::new()));
            if slot.is_null() {
                *slot = Value::Array(Vec::new());
            }
            let Value::Array(items) = slot else {
                return Err(Error::InvalidPath {
                    path: REASONS.into(),
                    reason: "existing value is not a list".into(),
                });
            };

            if items.iter().any(|v| v.as_str() == Some(reason.as_str())) {
                return Ok(false);
            }
            items.push(Value::String(reason));
            Ok(true)
        })
        .await
    }

    /// Drop a reason. Returns whether it was listed.
    pub async fn remove_reason(&self, session_id: &str, reason: &str) -> Result<bool> {
        let reason = reason.to_string();
        self.modify(session_id, "remove_reason", move |doc| {
            let Some(Value::Array(items)) = root_mut(doc)?.get_mut(REASONS) else {
                return Ok(false);
            };
            let before = items.len();
            items.retain(|v| v.as_str() != Some(reason.as_str()));
            Ok(items.len() != before)
        })
        .await
    }

    pub async fn set_reasons_confirmed(&self, session_id: &str, confirmed: bool) -> Result<()> {
        self.set_path(session_id, REASONS_CONFIRMED, Value::Bool(confirmed)).await
    }

    pub async fn get_reasons_confirmed(&self, session_id: &str) -> Result<bool> {
        self.get_flag(session_id, REASONS_CONFIRMED).await
    }

    // ------------------------------------------------------------------
    // Loan variables
    // ------------------------------------------------------------------

    pub async fn set_vars_info_given(&self, session_id: &str, given: bool) -> Result<()> {
        self.set_path(session_id, VARS_INFO_GIVEN, Value::Bool(given)).await
    }

    pub async fn get_vars_info_given(&self, session_id: &str) -> Result<bool> {
        self.get_flag(session_id, VARS_INFO_GIVEN).await
    }

    pub async fn set_vars(&self, session_id: &str, vars: Value) -> Result<()> {
        self.set_path(session_id, VARS, vars).await
    }

    /// `{monthly: null, duration: null, rate: null}` when nothing was recorded.
    pub async fn get_vars(&self, session_id: &str) -> Result<Value> {
        match self.lookup(session_id, VARS).await? {
            Some(Value::Null) | None => Ok(default_vars()),
            Some(value) => Ok(value),
        }
    }

    /// Set one variable. The other figures are seeded as `null` if `vars`
    /// was never written.
    pub async fn update_var(&self, session_id: &str, name: &str, value: Value) -> Result<()> {
        let path = DocPath::parse(&format!("{VARS}.{name}"))?;
        if path.segments().len() != 2 {
            return Err(Error::InvalidPath {
                path: name.to_string(),
                reason: "variable name must be a single segment".into(),
            });
        }
        let name = name.to_string();
        self.modify(session_id, "update_var", move |doc| {
            vars_mut(doc)?.insert(name, value);
            Ok(true)
        })
        .await
        .map(drop)
    }

    /// One variable; `null` when unset.
    pub async fn get_var(&self, session_id: &str, name: &str) -> Result<Value> {
        let vars = self.get_vars(session_id).await?;
        Ok(vars.get(name).cloned().unwrap_or(Value::Null))
    }

    /// Write the provided figures; `None` fields keep their stored value.
    pub async fn set_loan_variables(&self, session_id: &str, vars: LoanVariables) -> Result<()> {
        let provided: Vec<(&str, Value)> = [
            ("monthly", vars.monthly),
            ("duration", vars.duration),
            ("rate", vars.rate),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect();
        if provided.is_empty() {
            return Ok(());
        }

        self.modify(session_id, "set_loan_variables", move |doc| {
            let slot = vars_mut(doc)?;
            for (key, value) in provided {
                slot.insert(key.to_string(), value);
            }
            Ok(true)
        })
        .await
        .map(drop)
    }

    pub async fn get_loan_variables(&self, session_id: &str) -> Result<LoanVariables> {
        let vars = self.get_vars(session_id).await?;
        Ok(LoanVariables {
            monthly: non_null(&vars, "monthly"),
            duration: non_null(&vars, "duration"),
            rate: non_null(&vars, "rate"),
        })
    }

    /// True iff monthly, duration and rate are all present and non-null.
    pub async fn is_loan_info_complete(&self, session_id: &str) -> Result<bool> {
        Ok(self.get_loan_variables(session_id).await?.is_complete())
    }

    /// Clear all loan figures and the `vars_info_given` flag in one write.
    pub async fn reset_loan_variables(&self, session_id: &str) -> Result<()> {
        self.modify(session_id, "reset_loan_variables", |doc| {
            let root = root_mut(doc)?;
            root.insert(VARS.into(), default_vars());
            root.insert(VARS_INFO_GIVEN.into(), Value::Bool(false));
            Ok(true)
        })
        .await
        .map(drop)
    }
}
