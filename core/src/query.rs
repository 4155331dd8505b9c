//! # Query Facade
//!
//! Read-only views over the store, shaped for display. Queries never
//! mutate anything and never require authentication — the write paths
//! are where the gate sits.
//!
//! History rows are denormalized: each one carries a snapshot of the
//! owning subject's display fields so a client can render a feed without
//! a second lookup. Orphaned entries (subject since removed under the
//! retain policy) come back with no subject attached rather than being
//! hidden.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config;
use crate::registry::{Category, Subject};
use crate::store::{DbError, TrackerDb};

// ---------------------------------------------------------------------------
// View Types
// ---------------------------------------------------------------------------

/// Filter for a history query. `Default` means "everything, recent first,
/// default page size".
#[derive(Clone, Copy, Debug, Default)]
pub struct HistoryFilter {
    /// Restrict to one subject's entries.
    pub subject_id: Option<u64>,
    /// Maximum rows to return. Defaults to
    /// [`config::DEFAULT_HISTORY_LIMIT`], capped at
    /// [`config::MAX_HISTORY_LIMIT`].
    pub limit: Option<usize>,
}

/// The display fields of a subject, snapshotted into a history row.
#[derive(Clone, Debug, Serialize)]
pub struct SubjectRef {
    pub name: String,
    pub label: String,
    pub color: String,
}

impl From<&Subject> for SubjectRef {
    fn from(subject: &Subject) -> Self {
        Self {
            name: subject.name.clone(),
            label: subject.label.clone(),
            color: subject.color.clone(),
        }
    }
}

/// One denormalized history row.
#[derive(Clone, Debug, Serialize)]
pub struct HistoryRow {
    pub id: u64,
    pub subject_id: u64,
    /// `None` when the subject has since been removed.
    pub subject: Option<SubjectRef>,
    pub delta: i64,
    pub category: String,
    pub note: Option<String>,
    pub timestamp_ms: i64,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Read-only query surface.
///
/// Cheap to clone — shares the underlying `TrackerDb`.
#[derive(Clone)]
pub struct Queries {
    db: Arc<TrackerDb>,
}

impl Queries {
    pub fn new(db: Arc<TrackerDb>) -> Self {
        Self { db }
    }

    /// All subjects with current balances, ascending by id (creation
    /// order).
    pub fn list_subjects(&self) -> Result<Vec<Subject>, DbError> {
        self.db.list_subjects()
    }

    /// All active categories, alphabetical by name.
    pub fn list_categories(&self) -> Result<Vec<Category>, DbError> {
        self.db.list_categories()
    }

    /// Recent ledger history, newest first, denormalized against the
    /// current subject records.
    pub fn list_history(&self, filter: HistoryFilter) -> Result<Vec<HistoryRow>, DbError> {
        let limit = filter
            .limit
            .unwrap_or(config::DEFAULT_HISTORY_LIMIT)
            .min(config::MAX_HISTORY_LIMIT);
        let entries = self.db.list_entries_desc(filter.subject_id, limit)?;

        // One subject lookup per distinct id, not per row.
        let mut subjects: HashMap<u64, Option<Subject>> = HashMap::new();
        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            let subject = match subjects.entry(entry.subject_id) {
                std::collections::hash_map::Entry::Occupied(o) => o.into_mut(),
                std::collections::hash_map::Entry::Vacant(v) => {
                    v.insert(self.db.get_subject(entry.subject_id)?)
                }
            };
            rows.push(HistoryRow {
                id: entry.id,
                subject_id: entry.subject_id,
                subject: subject.as_ref().map(SubjectRef::from),
                delta: entry.delta,
                category: entry.category,
                note: entry.note,
                timestamp_ms: entry.timestamp_ms,
            });
        }
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
