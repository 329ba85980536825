//! Advisory lease over a property store entry.
//!
//! Guards scheduled staleness evaluations against overlapping invocations from
//! an external periodic trigger. It uses:
//! - **CAS (Compare-and-Swap)**: acquisition and takeover via preconditioned writes
//! - **TTL (Time-to-Live)**: a crashed holder blocks others for at most one TTL
//!
//! # How It Works
//!
//! 1. Acquisition writes a record with the holder's ID and start time using the
//!    `DoesNotExist` precondition - only one writer can succeed
//! 2. If a record exists, it is taken over when released or older than the TTL,
//!    with a CAS on the version observed when reading it
//! 3. Otherwise acquisition reports [`LeaseOutcome::Held`] and the caller backs off
//! 4. Release rewrites the record as released, again with CAS, so a newer
//!    holder's lease is never clobbered
//!
//! # Example
//!
//! ```rust,ignore
//! let lease = AdvisoryLease::new(store.clone(), "syncSchedule_running", DEFAULT_LEASE_TTL);
//!
//! match lease.try_acquire(Utc::now()).await? {
//!     LeaseOutcome::Acquired(guard) => {
//!         // ... evaluate schedules ...
//!         guard.release().await?;
//!     }
//!     LeaseOutcome::Held { .. } => return Ok(()),
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::storage::{PropertyStore, WritePrecondition, WriteResult};

/// Default lease TTL (10 minutes). Must exceed a typical evaluation.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(10 * 60);

/// Lease record contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    /// Unique lease holder ID.
    pub holder_id: String,

    /// When the holder started.
    pub started_at: DateTime<Utc>,

    /// Set once the holder released the lease.
    #[serde(default)]
    pub released: bool,
}

impl LeaseRecord {
    /// Creates a fresh record for `holder_id` starting at `now`.
    #[must_use]
    pub fn new(holder_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            holder_id: holder_id.into(),
            started_at: now,
            released: false,
        }
    }

    /// Decodes a stored record.
    ///
    /// Besides the JSON form, a bare epoch-milliseconds start timestamp is
    /// accepted; such records have an anonymous holder.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the value is neither form.
    pub fn decode(raw: &str) -> Result<Self> {
        if let Ok(record) = serde_json::from_str::<Self>(raw) {
            return Ok(record);
        }
        let millis: i64 = raw.trim().parse().map_err(|_| Error::Serialization {
            message: format!("unrecognized lease record: {raw}"),
        })?;
        let started_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| Error::Serialization {
                message: format!("lease start out of range: {millis}"),
            })?;
        Ok(Self {
            holder_id: String::new(),
            started_at,
            released: false,
        })
    }

    /// Returns whether this record still excludes other holders at `now`.
    #[must_use]
    pub fn is_active(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        if self.released {
            return false;
        }
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.started_at) < ttl
    }

    fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outcome of a single acquisition attempt.
pub enum LeaseOutcome<S: PropertyStore + ?Sized> {
    /// The caller now holds the lease.
    Acquired(LeaseGuard<S>),
    /// Another holder's lease is still live.
    Held {
        /// Holder ID of the current lease (empty if anonymous).
        holder_id: String,
        /// When the current holder started.
        started_at: DateTime<Utc>,
    },
}

impl<S: PropertyStore + ?Sized> std::fmt::Debug for LeaseOutcome<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acquired(guard) => f
                .debug_tuple("Acquired")
                .field(&guard.holder_id)
                .finish(),
            Self::Held {
                holder_id,
                started_at,
            } => f
                .debug_struct("Held")
                .field("holder_id", holder_id)
                .field("started_at", started_at)
                .finish(),
        }
    }
}

/// A TTL lease backed by one property store key.
pub struct AdvisoryLease<S: PropertyStore + ?Sized> {
    store: Arc<S>,
    key: String,
    holder_id: String,
    ttl: Duration,
}

impl<S: PropertyStore + ?Sized> Clone for AdvisoryLease<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
            holder_id: self.holder_id.clone(),
            ttl: self.ttl,
        }
    }
}

impl<S: PropertyStore + ?Sized> AdvisoryLease<S> {
    /// Creates a new lease handle with a unique holder ID.
    #[must_use]
    pub fn new(store: Arc<S>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            holder_id: Ulid::new().to_string(),
            ttl,
        }
    }

    /// Returns the holder ID for this handle.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Attempts to acquire the lease once.
    ///
    /// # Errors
    ///
    /// Returns an error if the property store fails or the stored record
    /// cannot be decoded.
    pub async fn try_acquire(&self, now: DateTime<Utc>) -> Result<LeaseOutcome<S>> {
        let record = LeaseRecord::new(&self.holder_id, now).encode()?;

        match self
            .store
            .put(&self.key, record.clone(), WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { version } => return Ok(self.guard(version)),
            WriteResult::PreconditionFailed { .. } => {}
        }

        // The version read here is the one the takeover CAS is bound to.
        let Some(existing) = self.store.get(&self.key).await? else {
            // Deleted between our write and read; report as held so the
            // caller simply tries again on its next trigger.
            return Ok(LeaseOutcome::Held {
                holder_id: String::new(),
                started_at: now,
            });
        };

        let current = match LeaseRecord::decode(&existing.value) {
            Ok(current) => current,
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "overwriting unreadable lease record");
                LeaseRecord {
                    holder_id: String::new(),
                    started_at: DateTime::<Utc>::MIN_UTC,
                    released: true,
                }
            }
        };

        if current.is_active(self.ttl, now) {
            return Ok(LeaseOutcome::Held {
                holder_id: current.holder_id,
                started_at: current.started_at,
            });
        }

        if !current.released {
            tracing::warn!(
                key = %self.key,
                stale_holder = %current.holder_id,
                started_at = %current.started_at,
                "taking over stale lease"
            );
        }

        match self
            .store
            .put(
                &self.key,
                record,
                WritePrecondition::MatchesVersion(existing.version),
            )
            .await?
        {
            WriteResult::Success { version } => Ok(self.guard(version)),
            WriteResult::PreconditionFailed { .. } => {
                // Someone else won the takeover race.
                let winner = self
                    .store
                    .get(&self.key)
                    .await?
                    .and_then(|v| LeaseRecord::decode(&v.value).ok());
                Ok(LeaseOutcome::Held {
                    holder_id: winner.as_ref().map(|w| w.holder_id.clone()).unwrap_or_default(),
                    started_at: winner.map_or(now, |w| w.started_at),
                })
            }
        }
    }

    /// Reads the current record without acquiring.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or decoded.
    pub async fn current(&self) -> Result<Option<LeaseRecord>> {
        self.store
            .get(&self.key)
            .await?
            .map(|v| LeaseRecord::decode(&v.value))
            .transpose()
    }

    /// Checks if the lease is currently held by anyone at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read.
    pub async fn is_held(&self, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .current()
            .await?
            .is_some_and(|r| r.is_active(self.ttl, now)))
    }

    fn guard(&self, version: String) -> LeaseOutcome<S> {
        LeaseOutcome::Acquired(LeaseGuard {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
            holder_id: self.holder_id.clone(),
            version,
            released: false,
        })
    }
}

/// RAII guard for a held lease.
///
/// Prefer [`LeaseGuard::release`]; dropping the guard inside a Tokio runtime
/// spawns a best-effort release, outside one the TTL takes care of it.
pub struct LeaseGuard<S: PropertyStore + ?Sized> {
    store: Arc<S>,
    key: String,
    holder_id: String,
    version: String,
    released: bool,
}

impl<S: PropertyStore + ?Sized> LeaseGuard<S> {
    /// Returns the holder ID for this lease.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Explicitly releases the lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the release record could not be written.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        release_record(&*self.store, &self.key, &self.holder_id, &self.version).await
    }
}

impl<S: PropertyStore + ?Sized> Drop for LeaseGuard<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let holder = self.holder_id.clone();
        let version = self.version.clone();
        handle.spawn(async move {
            if let Err(err) = release_record(&*store, &key, &holder, &version).await {
                tracing::warn!(key = %key, error = %err, "lease release on drop failed");
            }
        });
    }
}

/// Marks the record released if it is still ours.
///
/// A precondition failure means another holder took over after our TTL; their
/// record is left intact.
async fn release_record<S: PropertyStore + ?Sized>(
    store: &S,
    key: &str,
    holder_id: &str,
    version: &str,
) -> Result<()> {
    let Some(existing) = store.get(key).await? else {
        return Ok(());
    };
    let Ok(mut record) = LeaseRecord::decode(&existing.value) else {
        return Ok(());
    };
    if record.holder_id != holder_id {
        return Ok(());
    }
    record.released = true;
    let _ = store
        .put(
            key,
            record.encode()?,
            WritePrecondition::MatchesVersion(version.to_string()),
        )
        .await?;
    Ok(())
}
