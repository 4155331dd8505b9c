//! # Ledger Service
//!
//! The single write path into the balance ledger. Every point a subject
//! earns or spends arrives here as a signed delta, is validated, and is
//! applied atomically: one immutable [`LedgerEntry`] appended, one
//! denormalized balance updated, in the same storage transaction.
//!
//! Entries are never edited or deleted by any ledger operation. The
//! history is the audit trail; corrections are made by applying a
//! compensating delta, not by rewriting the past.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config;
use crate::registry::Subject;
use crate::store::{DbError, TrackerDb};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while applying a delta.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A delta of zero: no-op writes are rejected so the history never
    /// carries entries that changed nothing.
    #[error("delta must be non-zero")]
    ZeroDelta,

    /// The referenced subject does not exist.
    #[error("subject not found: {0}")]
    SubjectNotFound(u64),

    /// Applying the delta would overflow the i64 balance.
    #[error("balance overflow on subject {subject_id}: current {current}, delta {delta}")]
    Overflow {
        subject_id: u64,
        current: i64,
        delta: i64,
    },

    /// The underlying store failed.
    #[error("storage error: {0}")]
    Db(DbError),
}

impl From<DbError> for LedgerError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::SubjectNotFound(id) => LedgerError::SubjectNotFound(id),
            DbError::BalanceOverflow {
                subject_id,
                current,
                delta,
            } => LedgerError::Overflow {
                subject_id,
                current,
                delta,
            },
            other => LedgerError::Db(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One immutable ledger entry: a signed balance change, attributed to a
/// subject and a category, timestamped at apply time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Dense sequential id, assigned inside the apply transaction. Id
    /// order == insertion order.
    pub id: u64,

    /// The subject this delta was applied to. Kept even after the subject
    /// is removed under the retain policy.
    pub subject_id: u64,

    /// The signed change as requested. Recorded verbatim even when the
    /// clamp policy floors the resulting balance.
    pub delta: i64,

    /// Category name as free text, frozen at apply time. Category renames
    /// and removals never rewrite it.
    pub category: String,

    /// Optional free-text annotation.
    pub note: Option<String>,

    /// Apply instant, Unix milliseconds. Monotonic non-decreasing across
    /// the whole ledger.
    pub timestamp_ms: i64,
}

/// How a balance behaves when a spend exceeds it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BalancePolicy {
    /// Balances may go negative; the running balance is always the exact
    /// sum of applied deltas. The default.
    #[default]
    AllowNegative,
    /// Balances floor at zero. The entry still records the full requested
    /// delta, so under this policy the balance can drift above the sum.
    ClampAtZero,
}

/// The outcome of a successful apply: the subject with its new balance,
/// and the entry that was appended.
#[derive(Clone, Debug)]
pub struct Applied {
    pub subject: Subject,
    pub entry: LedgerEntry,
}

// ---------------------------------------------------------------------------
// LedgerService
// ---------------------------------------------------------------------------

/// Applies signed deltas to subject balances.
///
/// Cheap to clone — shares the underlying `TrackerDb`.
#[derive(Clone)]
pub struct LedgerService {
    db: Arc<TrackerDb>,
    policy: BalancePolicy,
}

impl LedgerService {
    pub fn new(db: Arc<TrackerDb>, policy: BalancePolicy) -> Self {
        Self { db, policy }
    }

    /// Applies one signed delta to a subject's balance.
    ///
    /// `category` defaults to the system default when absent or blank,
    /// so every entry is attributed to *something*. Validation order:
    /// zero deltas are rejected before the subject is even looked up.
    pub fn apply_delta(
        &self,
        subject_id: u64,
        delta: i64,
        category: Option<&str>,
        note: Option<&str>,
    ) -> Result<Applied, LedgerError> {
        if delta == 0 {
            return Err(LedgerError::ZeroDelta);
        }

        let category = match category.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => config::DEFAULT_CATEGORY,
        };
        let note = note.map(str::trim).filter(|n| !n.is_empty());

        let (subject, entry) = self
            .db
            .apply_delta(subject_id, delta, category, note, self.policy)?;

        tracing::info!(
            subject_id,
            delta,
            category = %entry.category,
            balance = subject.balance,
            "delta applied"
        );
        Ok(Applied { subject, entry })
    }

    /// The configured balance policy.
    pub fn policy(&self) -> BalancePolicy {
        self.policy
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
