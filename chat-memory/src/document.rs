//! Nested metadata documents addressed by dot-paths.
//!
//! A document is a `serde_json::Value` whose root is always a map. Paths such
//! as `user_info.preferences.learning_style` walk the tree one key per
//! segment. Reads return `None` for a missing path, which is distinct from a
//! stored `null`. Writes create intermediate maps as needed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Per-session metadata tree.
pub type Document = Value;

/// An empty document (a map with no keys).
pub fn empty_document() -> Document {
    Value::Object(Map::new())
}

/// A parsed dot-separated path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath {
    raw: String,
    segments: Vec<String>,
}

impl DocPath {
    /// Parse a dot-separated path. Empty paths and empty segments
    /// (`"a..b"`, `".a"`, `"a."`) are rejected.
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                reason: "path is empty".into(),
            });
        }

        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if let Some(pos) = segments.iter().position(String::is_empty) {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                reason: format!("segment {pos} is empty"),
            });
        }

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DocPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DocPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DocPath> for String {
    fn from(path: DocPath) -> Self {
        path.raw
    }
}

/// Read the value at `path`. `None` means absent.
///
/// Numeric segments index into lists on the read side only.
pub fn get_path<'a>(doc: &'a Document, path: &DocPath) -> Option<&'a Value> {
    lookup(doc, path.segments())
}

fn lookup<'a>(node: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(node);
    };
    let child = match node {
        Value::Object(map) => map.get(head),
        Value::Array(items) => head.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }?;
    lookup(child, rest)
}

/// Write `value` at `path`, creating intermediate maps.
///
/// A missing or `null` intermediate becomes a map; any other non-map
/// intermediate is an error and leaves the document untouched.
pub fn set_path(doc: &mut Document, path: &DocPath, value: Value) -> Result<()> {
    assign(doc, path.segments(), value, path)
}

fn assign(node: &mut Value, segments: &[String], value: Value, path: &DocPath) -> Result<()> {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return Ok(());
    };

    if node.is_null() {
        *node = empty_document();
    }
    let Value::Object(map) = node else {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: format!("cannot create key '{head}' inside a non-map value"),
        });
    };

    let child = map.entry(head.clone()).or_insert(Value::Null);
    assign(child, rest, value, path)
}

/// Remove the value at `path`. Returns whether anything was removed.
pub fn remove_path(doc: &mut Document, path: &DocPath) -> bool {
    let Some((last, parents)) = path.segments().split_last() else {
        return false;
    };

    let mut node = doc;
    for segment in parents {
        node = match node {
            Value::Object(map) => match map.get_mut(segment) {
                Some(child) => child,
                None => return false,
            },
            _ => return false,
        };
    }

    match node {
        Value::Object(map) => map.remove(last).is_some(),
        _ => false,
    }
}

/// Deep-merge `source` into `target`.
///
/// Maps under a shared key merge recursively; everything else, lists
/// included, is replaced wholesale.
pub fn merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(&key) {
                    Some(target_value) => merge(target_value, source_value),
                    None => {
                        target_map.insert(key, source_value);
                    }
                }
            }
        }
        (target, source) => {
            *target = source;
        }
    }
}

/// A single atomic change to a session's metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DocumentUpdate {
    /// Write one value at a path
    Set { path: DocPath, value: Value },
    /// Drop the value at a path
    Remove { path: DocPath },
    /// Deep-merge a partial document into the root
    Merge { partial: Value },
    /// Replace the whole document
    Replace { document: Value },
}

impl DocumentUpdate {
    /// Apply to `doc`. Returns `false` only for a `Remove` that found nothing.
    pub fn apply(self, doc: &mut Document) -> Result<bool> {
        match self {
            Self::Set { path, value } => {
                set_path(doc, &path, value)?;
                Ok(true)
            }
            Self::Remove { path } => Ok(remove_path(doc, &path)),
            Self::Merge { partial } => {
                if !partial.is_object() {
                    return Err(Error::InvalidDocument(
                        "merge requires a map at the top level".into(),
                    ));
                }
                merge(doc, partial);
                Ok(true)
            }
            Self::Replace { document } => {
                if !document.is_object() {
                    return Err(Error::InvalidDocument(
                        "document root must be a map".into(),
                    ));
                }
                *doc = document;
                Ok(true)
            }
        }
    }
}
