//! # TrackerDb — Persistent Storage Engine
//!
//! The persistence layer for the points ledger, built on sled's embedded
//! key-value store. All on-disk data flows through this module.
//!
//! ## Tree Layout
//!
//! sled organizes data into named "trees" (analogous to tables in SQL).
//! Each tree is an independent B+ tree with its own keyspace:
//!
//! | Tree         | Key                  | Value                   |
//! |--------------|----------------------|-------------------------|
//! | `subjects`   | `subject id` (8B BE) | `bincode(Subject)`      |
//! | `categories` | `name` (UTF-8)       | `bincode(Category)`     |
//! | `entries`    | `entry id` (8B BE)   | `bincode(LedgerEntry)`  |
//! | `sessions`   | `token` (UTF-8)      | `bincode(Session)`      |
//! | `metadata`   | key (UTF-8)          | 8-byte BE integer       |
//!
//! Subject and entry ids are stored as big-endian u64 so that sled's
//! lexicographic ordering matches numeric ordering — subjects list in id
//! order by a plain forward scan, and history lists newest-first by a
//! reverse scan, with no sort step.
//!
//! ## Atomicity
//!
//! [`TrackerDb::apply_delta`] is the one operation that must write to more
//! than one record: it appends an immutable ledger entry AND updates the
//! subject's denormalized balance. Both writes (plus the entry-id counter
//! and the timestamp watermark) ride a single sled transaction across the
//! `subjects`, `entries`, and `metadata` trees. sled re-runs the closure on
//! conflict, so concurrent callers serialize and the final balance is the
//! exact sum of all accepted deltas — no lost updates, no partial writes.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Batch, Db, Tree};
use std::path::Path;

use crate::ledger::{BalancePolicy, LedgerEntry};
use crate::registry::{Category, Subject};
use crate::session::Session;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("subject not found: {0}")]
    SubjectNotFound(u64),

    #[error("balance overflow on subject {subject_id}: current {current}, delta {delta}")]
    BalanceOverflow {
        subject_id: u64,
        current: i64,
        delta: i64,
    },
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// History Policy
// ---------------------------------------------------------------------------

/// What happens to a subject's ledger entries when the subject is removed.
///
/// The ledger is immutable under every *ledger* operation; removal of the
/// subject itself is the single place where history may legitimately go
/// away, and the installation has to choose that explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryPolicy {
    /// Keep the entries. They become orphans: still queryable, but with no
    /// subject to denormalize against.
    Retain,
    /// Delete every entry attributed to the removed subject.
    Cascade,
}

// ---------------------------------------------------------------------------
// Metadata Keys
// ---------------------------------------------------------------------------

/// Last subject id handed out. Subject ids start at 1.
const META_LAST_SUBJECT_ID: &[u8] = b"last_subject_id";

/// Last ledger entry id handed out. Entry ids start at 1 and are assigned
/// inside the apply transaction, so they are dense and insertion-ordered.
const META_LAST_ENTRY_ID: &[u8] = b"last_entry_id";

/// Timestamp watermark (Unix millis) of the most recent ledger entry.
/// Read and advanced inside the apply transaction so entry timestamps are
/// monotonic non-decreasing even if the wall clock steps backwards.
const META_LAST_ENTRY_TS: &[u8] = b"last_entry_ts";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn decode_u64(bytes: &[u8]) -> u64 {
    bytes.try_into().map(u64::from_be_bytes).unwrap_or(0)
}

fn decode_i64(bytes: &[u8]) -> i64 {
    bytes.try_into().map(i64::from_be_bytes).unwrap_or(0)
}

fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

/// Maps a bincode failure inside a transaction closure to an abort.
fn abort_ser(e: bincode::Error) -> ConflictableTransactionError<DbError> {
    ConflictableTransactionError::Abort(DbError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// TrackerDb
// ---------------------------------------------------------------------------

/// Persistent storage engine for subjects, categories, ledger entries,
/// and sessions.
///
/// Wraps a sled `Db` instance and exposes typed accessors per record
/// family. All serialization uses bincode for compactness and speed.
///
/// # Thread Safety
///
/// sled is inherently thread-safe — all trees support lock-free concurrent
/// reads and serialized writes. `TrackerDb` can be shared across threads
/// via `Arc<TrackerDb>` without external synchronization.
#[derive(Debug, Clone)]
pub struct TrackerDb {
    /// The underlying sled database handle.
    db: Db,
    /// Subjects indexed by id (big-endian u64 keys).
    subjects: Tree,
    /// Categories indexed by name (UTF-8). Key order == alphabetical order.
    categories: Tree,
    /// Ledger entries indexed by entry id (big-endian u64 keys).
    entries: Tree,
    /// Sessions indexed by their opaque token.
    sessions: Tree,
    /// Counters and watermarks.
    metadata: Tree,
}

impl TrackerDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that lives in memory and is cleaned
    /// up automatically when the `TrackerDb` is dropped.
    ///
    /// Ideal for unit tests — no filesystem side effects, no cleanup needed.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    /// Internal constructor: opens named trees from an existing sled `Db`.
    fn from_db(db: Db) -> DbResult<Self> {
        let subjects = db.open_tree("subjects")?;
        let categories = db.open_tree("categories")?;
        let entries = db.open_tree("entries")?;
        let sessions = db.open_tree("sessions")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            subjects,
            categories,
            entries,
            sessions,
            metadata,
        })
    }

    // -- Subject operations -------------------------------------------------

    /// Hand out a fresh subject id. Ids start at 1 and never repeat, even
    /// across removals — a removed subject's id is retired, not recycled,
    /// so orphaned history can never be re-attributed.
    pub fn allocate_subject_id(&self) -> DbResult<u64> {
        let updated = self
            .metadata
            .update_and_fetch(META_LAST_SUBJECT_ID, |current| {
                let next = current.map(decode_u64).unwrap_or(0) + 1;
                Some(next.to_be_bytes().to_vec())
            })?;
        Ok(updated.map(|v| decode_u64(&v)).unwrap_or(1))
    }

    /// Persist a subject record (insert or full overwrite).
    pub fn put_subject(&self, subject: &Subject) -> DbResult<()> {
        let bytes = encode(subject)?;
        self.subjects.insert(&subject.id.to_be_bytes(), bytes)?;
        Ok(())
    }

    /// Retrieve a subject by id. Returns `None` if it does not exist.
    pub fn get_subject(&self, id: u64) -> DbResult<Option<Subject>> {
        match self.subjects.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a subject, applying the given history policy to its entries.
    ///
    /// Returns `false` if no subject with that id existed (and touches
    /// nothing in that case). The subject removal itself is a single-record
    /// write; under [`HistoryPolicy::Cascade`] the matching entries are
    /// then deleted in one batch.
    pub fn remove_subject(&self, id: u64, policy: HistoryPolicy) -> DbResult<bool> {
        let existed = self.subjects.remove(&id.to_be_bytes())?.is_some();
        if existed && policy == HistoryPolicy::Cascade {
            let mut batch = Batch::default();
            for item in self.entries.iter() {
                let (key, value) = item?;
                let entry: LedgerEntry = decode(&value)?;
                if entry.subject_id == id {
                    batch.remove(key);
                }
            }
            self.entries.apply_batch(batch)?;
        }
        if existed {
            self.db.flush()?;
        }
        Ok(existed)
    }

    /// All subjects, ascending by id (natural tree order).
    pub fn list_subjects(&self) -> DbResult<Vec<Subject>> {
        let mut out = Vec::new();
        for item in self.subjects.iter() {
            let (_key, value) = item?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    /// Number of subjects currently stored.
    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    // -- Ledger operations --------------------------------------------------

    /// Atomically append a ledger entry and apply its delta to the
    /// subject's balance.
    ///
    /// This is the crux of the engine. In one transaction:
    /// 1. The subject is read; an unknown id aborts with `SubjectNotFound`.
    /// 2. The next entry id and the timestamp watermark are read from
    ///    `metadata`; the entry timestamp is `max(now, watermark)` so
    ///    timestamps never run backwards.
    /// 3. The new [`LedgerEntry`] is appended to `entries`.
    /// 4. The subject's balance becomes `balance + delta` (checked i64
    ///    arithmetic; overflow aborts), floored at zero under
    ///    [`BalancePolicy::ClampAtZero`].
    /// 5. Counter and watermark advance.
    ///
    /// Either all five land or none do. The entry always records the
    /// requested delta, even when clamping floors the stored balance.
    pub fn apply_delta(
        &self,
        subject_id: u64,
        delta: i64,
        category: &str,
        note: Option<&str>,
        policy: BalancePolicy,
    ) -> DbResult<(Subject, LedgerEntry)> {
        let result = (&self.subjects, &self.entries, &self.metadata).transaction(
            |(subjects, entries, meta)| {
                let key = subject_id.to_be_bytes();
                let raw = subjects.get(key)?.ok_or(ConflictableTransactionError::Abort(
                    DbError::SubjectNotFound(subject_id),
                ))?;
                let mut subject: Subject = bincode::deserialize(&raw).map_err(abort_ser)?;

                let summed = subject.balance.checked_add(delta).ok_or(
                    ConflictableTransactionError::Abort(DbError::BalanceOverflow {
                        subject_id,
                        current: subject.balance,
                        delta,
                    }),
                )?;
                subject.balance = match policy {
                    BalancePolicy::AllowNegative => summed,
                    BalancePolicy::ClampAtZero => summed.max(0),
                };

                let entry_id = meta
                    .get(META_LAST_ENTRY_ID)?
                    .map(|v| decode_u64(&v))
                    .unwrap_or(0)
                    + 1;
                let watermark = meta
                    .get(META_LAST_ENTRY_TS)?
                    .map(|v| decode_i64(&v))
                    .unwrap_or(0);
                let timestamp_ms = Utc::now().timestamp_millis().max(watermark);

                let entry = LedgerEntry {
                    id: entry_id,
                    subject_id,
                    delta,
                    category: category.to_string(),
                    note: note.map(str::to_string),
                    timestamp_ms,
                };

                let subject_bytes = bincode::serialize(&subject).map_err(abort_ser)?;
                let entry_bytes = bincode::serialize(&entry).map_err(abort_ser)?;

                subjects.insert(&key[..], subject_bytes)?;
                entries.insert(&entry_id.to_be_bytes()[..], entry_bytes)?;
                meta.insert(META_LAST_ENTRY_ID, entry_id.to_be_bytes().to_vec())?;
                meta.insert(META_LAST_ENTRY_TS, timestamp_ms.to_be_bytes().to_vec())?;

                Ok((subject, entry))
            },
        );

        let applied = result.map_err(|e| match e {
            TransactionError::Abort(db_err) => db_err,
            TransactionError::Storage(sled_err) => DbError::Sled(sled_err),
        })?;

        // Flush so an accepted delta survives a crash.
        self.db.flush()?;
        Ok(applied)
    }

    /// Retrieve a single ledger entry by id.
    pub fn get_entry(&self, id: u64) -> DbResult<Option<LedgerEntry>> {
        match self.entries.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Ledger entries newest-first (reverse id scan), optionally filtered
    /// to one subject, capped at `limit`.
    pub fn list_entries_desc(
        &self,
        subject_id: Option<u64>,
        limit: usize,
    ) -> DbResult<Vec<LedgerEntry>> {
        let mut out = Vec::new();
        for item in self.entries.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (_key, value) = item?;
            let entry: LedgerEntry = decode(&value)?;
            if let Some(wanted) = subject_id {
                if entry.subject_id != wanted {
                    continue;
                }
            }
            out.push(entry);
        }
        Ok(out)
    }

    /// Number of ledger entries currently stored.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    // -- Category operations ------------------------------------------------

    /// Persist a category record (insert or full overwrite).
    pub fn put_category(&self, category: &Category) -> DbResult<()> {
        let bytes = encode(category)?;
        self.categories.insert(category.name.as_bytes(), bytes)?;
        Ok(())
    }

    /// Retrieve a category by exact (case-sensitive) name.
    pub fn get_category(&self, name: &str) -> DbResult<Option<Category>> {
        match self.categories.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a category from the active set. Never touches `entries` —
    /// history keeps referencing removed categories by name.
    pub fn remove_category(&self, name: &str) -> DbResult<bool> {
        Ok(self.categories.remove(name.as_bytes())?.is_some())
    }

    /// All active categories, alphabetical by name (byte-lexicographic
    /// tree order).
    pub fn list_categories(&self) -> DbResult<Vec<Category>> {
        let mut out = Vec::new();
        for item in self.categories.iter() {
            let (_key, value) = item?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    /// Number of active categories.
    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    // -- Session operations -------------------------------------------------

    /// Persist a session record.
    pub fn put_session(&self, session: &Session) -> DbResult<()> {
        let bytes = encode(session)?;
        self.sessions.insert(session.token.as_bytes(), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    /// Retrieve a session by token. Returns `None` for unknown tokens.
    pub fn get_session(&self, token: &str) -> DbResult<Option<Session>> {
        match self.sessions.get(token.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a session by token. Returns `false` if it was not present.
    pub fn remove_session(&self, token: &str) -> DbResult<bool> {
        Ok(self.sessions.remove(token.as_bytes())?.is_some())
    }

    /// All stored sessions, in token order.
    pub fn list_sessions(&self) -> DbResult<Vec<Session>> {
        let mut out = Vec::new();
        for item in self.sessions.iter() {
            let (_key, value) = item?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    /// Number of stored sessions (valid and expired alike).
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    // -- Utility operations -------------------------------------------------

    /// Force a flush of all pending writes to disk.
    ///
    /// sled buffers writes in memory for performance. This call blocks
    /// until all data is durable on the underlying storage device.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
