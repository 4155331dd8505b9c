//! # Entity Registry — Subjects & Categories
//!
//! Owns the mutable records the ledger hangs off of: the tracked subjects
//! ("kids") and the activity categories ("tags"). Balances are *read*
//! through these records but only ever *written* by the ledger service —
//! the registry refuses to touch them.
//!
//! ## Policy notes
//!
//! - Unknown subject ids fail with [`RegistryError::SubjectNotFound`],
//!   consistently, on every operation. No silent no-ops for subjects.
//! - The one deliberate exception: [`EntityRegistry::rename_category`] is
//!   a no-op when the old name doesn't exist, because category renames are
//!   routinely replayed by clients that cache the tag list.
//! - Category removal only shrinks the selectable set. Ledger entries
//!   reference categories by name, as free text, and keep doing so after
//!   the category is gone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config;
use crate::store::{DbError, HistoryPolicy, TrackerDb};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The referenced subject does not exist.
    #[error("subject not found: {0}")]
    SubjectNotFound(u64),

    /// A category with this exact name is already active.
    #[error("category already exists: {0}")]
    CategoryExists(String),

    /// A name was empty (or all whitespace) where one is required.
    #[error("name must not be empty")]
    EmptyName,

    /// A display color that isn't `#RRGGBB`.
    #[error("invalid color {0:?}: expected #RRGGBB")]
    InvalidColor(String),

    /// A subject label of the wrong length. Labels are exactly two
    /// characters.
    #[error("invalid label {0:?}: labels are exactly two characters")]
    InvalidLabel(String),

    /// The underlying store failed.
    #[error("storage error: {0}")]
    Db(#[from] DbError),
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A tracked subject accumulating a point balance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subject {
    /// Stable unique id, assigned at creation, never recycled.
    pub id: u64,

    /// Display name.
    pub name: String,

    /// Short fixed-length label ("initials") for compact display.
    pub label: String,

    /// Display color tag, `#RRGGBB`.
    pub color: String,

    /// Denormalized running balance. Mutated only by the ledger service's
    /// atomic apply; equal to the sum of all applied deltas (exactly so
    /// under the unclamped balance policy).
    pub balance: i64,

    /// When this subject was created (UTC).
    pub created_at: DateTime<Utc>,
}

/// A named activity category ("tag") attachable to ledger entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Category {
    /// Unique (case-sensitive) name. Doubles as the storage key; rename
    /// preserves identity by carrying color and polarity over.
    pub name: String,

    /// Display color, `#RRGGBB`.
    pub color: String,

    /// Advisory polarity: whether this category conventionally carries
    /// positive deltas. Never enforced against the sign of a delta.
    pub positive: bool,
}

/// Caller-supplied fields for a new subject. Everything is optional —
/// the registry fills in system defaults for whatever is omitted.
#[derive(Clone, Debug, Default)]
pub struct SubjectDraft {
    pub name: Option<String>,
    pub label: Option<String>,
    pub color: Option<String>,
}

// ---------------------------------------------------------------------------
// EntityRegistry
// ---------------------------------------------------------------------------

/// CRUD over subjects and categories.
///
/// Cheap to clone — shares the underlying `TrackerDb`.
#[derive(Clone)]
pub struct EntityRegistry {
    db: Arc<TrackerDb>,
    history_policy: HistoryPolicy,
}

impl EntityRegistry {
    /// Creates a registry. `history_policy` decides what happens to a
    /// removed subject's ledger entries.
    pub fn new(db: Arc<TrackerDb>, history_policy: HistoryPolicy) -> Self {
        Self { db, history_policy }
    }

    // -- Subjects -----------------------------------------------------------

    /// Creates a subject with a fresh id, zero balance, and system
    /// defaults for any omitted display fields: name `Kid <id>`, label
    /// derived from the name, color cycled from the palette by id.
    pub fn create_subject(&self, draft: SubjectDraft) -> Result<Subject, RegistryError> {
        if let Some(color) = draft.color.as_deref() {
            validate_color(color)?;
        }
        if let Some(label) = draft.label.as_deref() {
            validate_label(label)?;
        }
        if let Some(name) = draft.name.as_deref() {
            if name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
        }

        let id = self.db.allocate_subject_id()?;
        let name = draft
            .name
            .map(|n| n.trim().to_string())
            .unwrap_or_else(|| format!("Kid {id}"));
        let label = draft.label.unwrap_or_else(|| derive_label(&name));
        let color = draft
            .color
            .unwrap_or_else(|| default_color_for(id).to_string());

        let subject = Subject {
            id,
            name,
            label,
            color,
            balance: 0,
            created_at: Utc::now(),
        };
        self.db.put_subject(&subject)?;

        tracing::info!(id, name = %subject.name, "subject created");
        Ok(subject)
    }

    /// Updates a subject's fields. Partial: `None` leaves a field
    /// untouched. Every provided field is validated before the single
    /// record write, so a request carrying one good field and one bad
    /// field changes nothing at all.
    pub fn update_subject(
        &self,
        id: u64,
        name: Option<&str>,
        color: Option<&str>,
        label: Option<&str>,
    ) -> Result<Subject, RegistryError> {
        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
        }
        if let Some(color) = color {
            validate_color(color)?;
        }
        if let Some(label) = label {
            validate_label(label)?;
        }

        let mut subject = self.require_subject(id)?;
        if let Some(name) = name {
            subject.name = name.trim().to_string();
        }
        if let Some(color) = color {
            subject.color = color.to_string();
        }
        if let Some(label) = label {
            subject.label = label.to_string();
        }
        self.db.put_subject(&subject)?;
        Ok(subject)
    }

    /// Renames a subject. Fails with `SubjectNotFound` for unknown ids.
    pub fn rename_subject(&self, id: u64, name: &str) -> Result<Subject, RegistryError> {
        self.update_subject(id, Some(name), None, None)
    }

    /// Updates a subject's display fields only.
    pub fn restyle_subject(
        &self,
        id: u64,
        color: Option<&str>,
        label: Option<&str>,
    ) -> Result<Subject, RegistryError> {
        self.update_subject(id, None, color, label)
    }

    /// Removes a subject, applying the configured history policy to its
    /// ledger entries. Fails with `SubjectNotFound` for unknown ids.
    pub fn remove_subject(&self, id: u64) -> Result<(), RegistryError> {
        if !self.db.remove_subject(id, self.history_policy)? {
            return Err(RegistryError::SubjectNotFound(id));
        }
        tracing::info!(id, policy = ?self.history_policy, "subject removed");
        Ok(())
    }

    fn require_subject(&self, id: u64) -> Result<Subject, RegistryError> {
        self.db
            .get_subject(id)?
            .ok_or(RegistryError::SubjectNotFound(id))
    }

    // -- Categories ---------------------------------------------------------

    /// Creates a category. Fails with `CategoryExists` if the exact
    /// (case-sensitive) name is already active. A name that was removed
    /// earlier may be created again.
    pub fn create_category(
        &self,
        name: &str,
        color: &str,
        positive: bool,
    ) -> Result<Category, RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        validate_color(color)?;

        if self.db.get_category(name)?.is_some() {
            return Err(RegistryError::CategoryExists(name.to_string()));
        }

        let category = Category {
            name: name.to_string(),
            color: color.to_string(),
            positive,
        };
        self.db.put_category(&category)?;
        Ok(category)
    }

    /// Renames a category, preserving its color and polarity.
    ///
    /// A no-op (not an error) when `old` doesn't exist. Fails with
    /// `CategoryExists` when `new` is already taken by another category.
    /// Existing ledger entries keep the old name — history is immutable.
    pub fn rename_category(&self, old: &str, new: &str) -> Result<(), RegistryError> {
        let new = new.trim();
        if new.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if old == new {
            return Ok(());
        }

        let Some(category) = self.db.get_category(old)? else {
            return Ok(());
        };
        if self.db.get_category(new)?.is_some() {
            return Err(RegistryError::CategoryExists(new.to_string()));
        }

        // Insert under the new key first, then drop the old one — a crash
        // in between leaves a duplicate, never a lost category.
        self.db.put_category(&Category {
            name: new.to_string(),
            ..category
        })?;
        self.db.remove_category(old)?;
        Ok(())
    }

    /// Removes a category from the selectable set. Idempotent — removing
    /// an absent name is fine. Never touches ledger history.
    pub fn remove_category(&self, name: &str) -> Result<(), RegistryError> {
        self.db.remove_category(name)?;
        Ok(())
    }

    // -- Seeding ------------------------------------------------------------

    /// Installs the starter subjects and categories into an empty store.
    /// Idempotent: each family is seeded only while its tree is empty, so
    /// a household that deleted the defaults doesn't get them back on the
    /// next boot.
    pub fn ensure_defaults(&self) -> Result<(), RegistryError> {
        if self.db.subject_count() == 0 {
            for (name, label, color) in config::DEFAULT_SUBJECTS {
                self.create_subject(SubjectDraft {
                    name: Some(name.to_string()),
                    label: Some(label.to_string()),
                    color: Some(color.to_string()),
                })?;
            }
            tracing::info!("seeded default subjects");
        }
        if self.db.category_count() == 0 {
            for (name, color, positive) in config::DEFAULT_CATEGORIES {
                self.create_category(name, color, positive)?;
            }
            tracing::info!("seeded default categories");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Defaults & Validation
// ---------------------------------------------------------------------------

/// Palette color for a given subject id, cycling so consecutive ids get
/// distinct colors.
fn default_color_for(id: u64) -> &'static str {
    let index = (id.saturating_sub(1) as usize) % config::SUBJECT_PALETTE.len();
    config::SUBJECT_PALETTE[index]
}

/// Derives a two-character label from a display name: initials of the
/// first two words, or the first two characters of a single word,
/// uppercased. Falls back to "??" for degenerate input.
fn derive_label(name: &str) -> String {
    let mut words = name.split_whitespace();
    let chars: Vec<char> = match (words.next(), words.next()) {
        (Some(first), Some(second)) => first
            .chars()
            .take(1)
            .chain(second.chars().take(1))
            .collect(),
        (Some(only), None) => only.chars().take(config::SUBJECT_LABEL_LEN).collect(),
        _ => Vec::new(),
    };

    let mut label: String = chars.into_iter().flat_map(|c| c.to_uppercase()).collect();
    while label.chars().count() < config::SUBJECT_LABEL_LEN {
        label.push('?');
    }
    label.chars().take(config::SUBJECT_LABEL_LEN).collect()
}

fn validate_color(color: &str) -> Result<(), RegistryError> {
    let well_formed = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if well_formed {
        Ok(())
    } else {
        Err(RegistryError::InvalidColor(color.to_string()))
    }
}

fn validate_label(label: &str) -> Result<(), RegistryError> {
    if label.chars().count() == config::SUBJECT_LABEL_LEN {
        Ok(())
    } else {
        Err(RegistryError::InvalidLabel(label.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> EntityRegistry {
        EntityRegistry::new(
            Arc::new(TrackerDb::open_temporary().unwrap()),
            HistoryPolicy::Retain,
        )
    }

    // -- Subjects -----------------------------------------------------------

    #[test]
    fn create_subject_with_full_defaults() {
        let registry = registry();
        let subject = registry.create_subject(SubjectDraft::default()).unwrap();

        assert_eq!(subject.id, 1);
        assert_eq!(subject.name, "Kid 1");
        assert_eq!(subject.label, "K1");
        assert_eq!(subject.color, config::SUBJECT_PALETTE[0]);
        assert_eq!(subject.balance, 0);
    }

    #[test]
    fn create_subject_honors_provided_fields() {
        let registry = registry();
        let subject = registry
            .create_subject(SubjectDraft {
                name: Some("Alice Smith".into()),
                label: Some("AS".into()),
                color: Some("#112233".into()),
            })
            .unwrap();

        assert_eq!(subject.name, "Alice Smith");
        assert_eq!(subject.label, "AS");
        assert_eq!(subject.color, "#112233");
    }

    #[test]
    fn palette_cycles_across_consecutive_subjects() {
        let registry = registry();
        let n = config::SUBJECT_PALETTE.len();
        for i in 0..n + 1 {
            let s = registry.create_subject(SubjectDraft::default()).unwrap();
            assert_eq!(s.color, config::SUBJECT_PALETTE[i % n]);
        }
    }

    #[test]
    fn create_subject_rejects_bad_input_before_allocating() {
        let registry = registry();
        let bad_color = registry.create_subject(SubjectDraft {
            color: Some("red".into()),
            ..Default::default()
        });
        assert!(matches!(bad_color, Err(RegistryError::InvalidColor(_))));

        let bad_label = registry.create_subject(SubjectDraft {
            label: Some("TOOLONG".into()),
            ..Default::default()
        });
        assert!(matches!(bad_label, Err(RegistryError::InvalidLabel(_))));

        // Rejection happens before id allocation: the next good create
        // still gets id 1.
        let ok = registry.create_subject(SubjectDraft::default()).unwrap();
        assert_eq!(ok.id, 1);
    }

    #[test]
    fn rename_subject_updates_name_only() {
        let registry = registry();
        let subject = registry.create_subject(SubjectDraft::default()).unwrap();
        let renamed = registry.rename_subject(subject.id, "  Bob  ").unwrap();

        assert_eq!(renamed.name, "Bob");
        assert_eq!(renamed.label, subject.label);
        assert_eq!(renamed.color, subject.color);
    }

    #[test]
    fn rename_unknown_subject_fails() {
        let registry = registry();
        let result = registry.rename_subject(77, "Ghost");
        assert!(matches!(result, Err(RegistryError::SubjectNotFound(77))));
    }

    #[test]
    fn restyle_is_partial() {
        let registry = registry();
        let subject = registry.create_subject(SubjectDraft::default()).unwrap();

        let restyled = registry
            .restyle_subject(subject.id, Some("#ABCDEF"), None)
            .unwrap();
        assert_eq!(restyled.color, "#ABCDEF");
        assert_eq!(restyled.label, subject.label);

        let restyled = registry
            .restyle_subject(subject.id, None, Some("ZZ"))
            .unwrap();
        assert_eq!(restyled.label, "ZZ");
        assert_eq!(restyled.color, "#ABCDEF");
    }

    #[test]
    fn restyle_validates_before_writing() {
        let registry = registry();
        let subject = registry.create_subject(SubjectDraft::default()).unwrap();

        // Good color + bad label: neither field may change.
        let result = registry.restyle_subject(subject.id, Some("#ABCDEF"), Some("X"));
        assert!(matches!(result, Err(RegistryError::InvalidLabel(_))));

        let stored = registry.require_subject(subject.id).unwrap();
        assert_eq!(stored.color, subject.color);
    }

    #[test]
    fn mixed_valid_and_invalid_update_changes_nothing() {
        let registry = registry();
        let subject = registry.create_subject(SubjectDraft::default()).unwrap();

        // A good name next to a bad label: the whole update must be
        // refused, including the name.
        let result = registry.update_subject(subject.id, Some("Renamed"), None, Some("TOOLONG"));
        assert!(matches!(result, Err(RegistryError::InvalidLabel(_))));

        let stored = registry.require_subject(subject.id).unwrap();
        assert_eq!(stored.name, subject.name);
        assert_eq!(stored.label, subject.label);

        // Same for a good name next to a bad color.
        let result = registry.update_subject(subject.id, Some("Renamed"), Some("red"), None);
        assert!(matches!(result, Err(RegistryError::InvalidColor(_))));
        let stored = registry.require_subject(subject.id).unwrap();
        assert_eq!(stored.name, subject.name);
    }

    #[test]
    fn remove_unknown_subject_fails() {
        let registry = registry();
        let result = registry.remove_subject(5);
        assert!(matches!(result, Err(RegistryError::SubjectNotFound(5))));
    }

    #[test]
    fn derive_label_from_names() {
        assert_eq!(derive_label("Kid 1"), "K1");
        assert_eq!(derive_label("Alice Smith"), "AS");
        assert_eq!(derive_label("Bo"), "BO");
        assert_eq!(derive_label("X"), "X?");
        assert_eq!(derive_label(""), "??");
    }

    // -- Categories ---------------------------------------------------------

    #[test]
    fn duplicate_category_conflicts_until_removed() {
        let registry = registry();
        registry.create_category("Chores", "#27AE60", true).unwrap();

        let dup = registry.create_category("Chores", "#000000", false);
        assert!(matches!(dup, Err(RegistryError::CategoryExists(_))));

        // Case-sensitive: a different casing is a different category.
        registry.create_category("chores", "#27AE60", true).unwrap();

        // After removal the name is free again.
        registry.remove_category("Chores").unwrap();
        registry.create_category("Chores", "#111111", true).unwrap();
    }

    #[test]
    fn rename_category_preserves_identity() {
        let registry = registry();
        registry.create_category("TV", "#9B59B6", false).unwrap();
        registry.rename_category("TV", "Screens").unwrap();

        let db = &registry.db;
        assert!(db.get_category("TV").unwrap().is_none());
        let renamed = db.get_category("Screens").unwrap().unwrap();
        assert_eq!(renamed.color, "#9B59B6");
        assert!(!renamed.positive);
    }

    #[test]
    fn rename_missing_category_is_noop() {
        let registry = registry();
        registry.rename_category("Nope", "Still Nope").unwrap();
        assert!(registry.db.get_category("Still Nope").unwrap().is_none());
    }

    #[test]
    fn rename_onto_existing_category_conflicts() {
        let registry = registry();
        registry.create_category("TV", "#9B59B6", false).unwrap();
        registry.create_category("Snacks", "#E67E22", false).unwrap();

        let result = registry.rename_category("TV", "Snacks");
        assert!(matches!(result, Err(RegistryError::CategoryExists(_))));
    }

    #[test]
    fn remove_category_is_idempotent() {
        let registry = registry();
        registry.remove_category("Never Existed").unwrap();
    }

    // -- Seeding ------------------------------------------------------------

    #[test]
    fn ensure_defaults_seeds_empty_store_once() {
        let registry = registry();
        registry.ensure_defaults().unwrap();

        assert_eq!(registry.db.subject_count(), config::DEFAULT_SUBJECTS.len());
        assert_eq!(
            registry.db.category_count(),
            config::DEFAULT_CATEGORIES.len()
        );

        // Second call must not duplicate anything.
        registry.ensure_defaults().unwrap();
        assert_eq!(registry.db.subject_count(), config::DEFAULT_SUBJECTS.len());
    }

    #[test]
    fn ensure_defaults_respects_deletions() {
        let registry = registry();
        registry.ensure_defaults().unwrap();

        registry.remove_category("TV").unwrap();
        registry.ensure_defaults().unwrap();
        assert!(
            registry.db.get_category("TV").unwrap().is_none(),
            "deleted defaults must stay deleted"
        );
    }
}
