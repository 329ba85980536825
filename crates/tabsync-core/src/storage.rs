//! Document-scoped property store with compare-and-set writes.
//!
//! Schedule run state and the advisory lease live in a small key-value store
//! attached to the destination document. The invoking process is short-lived,
//! so mutual exclusion is expressed as conditional writes against this store
//! rather than in-process locks.
//!
//! The version token is opaque: backends may use a generation number, an `ETag`
//! or anything else that changes on every write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if the key does not exist.
    DoesNotExist,
    /// Write only if the key's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Write succeeded, returns new version token.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed, returns current version token.
    PreconditionFailed {
        /// The current version that caused the precondition to fail.
        current_version: String,
    },
}

impl WriteResult {
    /// Returns true if the write was applied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// A stored value together with its version token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    /// Raw property value.
    pub value: String,
    /// Version token for CAS operations.
    pub version: String,
    /// Last modification timestamp.
    pub last_modified: DateTime<Utc>,
}

/// Key-value store scoped to one document.
#[async_trait]
pub trait PropertyStore: Send + Sync + 'static {
    /// Reads a property. Returns `None` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>>;

    /// Writes with optional precondition.
    ///
    /// Never returns an error for a precondition failure - that's a normal result.
    async fn put(
        &self,
        key: &str,
        value: String,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Deletes a property. Succeeds even if the key doesn't exist.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Lists keys starting with `prefix`, in arbitrary order.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory property store for tests and single-process use.
#[derive(Debug, Default, Clone)]
pub struct MemoryPropertyStore {
    entries: Arc<RwLock<HashMap<String, StoredEntry>>>,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl MemoryPropertyStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> Error {
        Error::Internal {
            message: "lock poisoned".into(),
        }
    }
}

#[async_trait]
impl PropertyStore for MemoryPropertyStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(key).map(|e| VersionedValue {
            value: e.value.clone(),
            version: e.version.to_string(),
            last_modified: e.last_modified,
        }))
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        let current = entries.get(key);

        match precondition {
            WritePrecondition::DoesNotExist => {
                if let Some(entry) = current {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: entry.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match current {
                    Some(entry) if entry.version != expected_num => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: entry.version.to_string(),
                        });
                    }
                    None => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: "0".to_string(),
                        });
                    }
                    _ => {}
                }
            }
            WritePrecondition::None => {}
        }

        let new_version = current.map_or(1, |e| e.version + 1);
        entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                version: new_version,
                last_modified: Utc::now(),
            },
        );
        drop(entries);

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
