//! # Tracker Configuration & Constants
//!
//! Every magic number in Tally lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Most of these values are behavioral contracts with existing clients
//! (token length, default category name, seed data), so changing them is
//! an API break even though nothing here looks important.

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Raw entropy per session token, in bytes. 32 bytes = 256 bits, which is
/// double the 128-bit floor we require for guessing/enumeration resistance.
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Length of the hex-rendered token string. Fixed: every token is exactly
/// this long, which lets validators reject garbage without a storage hit.
pub const SESSION_TOKEN_LEN: usize = SESSION_TOKEN_BYTES * 2;

/// Session lifetime in days. Deliberately long-lived — the whole point of
/// sessions here is that a parent types the password once per device and
/// then never again. Expiry exists so lost tokens eventually die, not to
/// force re-authentication.
pub const SESSION_TTL_DAYS: i64 = 365;

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Category recorded on a ledger entry when the caller omits one or sends
/// an empty/whitespace string. A literal, not a registered category — the
/// registry is never consulted for it.
pub const DEFAULT_CATEGORY: &str = "General";

/// History page size when the caller doesn't specify a limit.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Hard ceiling on a single history query. Requests above this are capped,
/// not rejected.
pub const MAX_HISTORY_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Subjects & Categories
// ---------------------------------------------------------------------------

/// Length of a subject's short label ("initials"). Labels are fixed-length:
/// exactly this many characters, always.
pub const SUBJECT_LABEL_LEN: usize = 2;

/// Display colors assigned to new subjects, cycling by id so that siblings
/// created back-to-back never collide visually.
pub const SUBJECT_PALETTE: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#9B59B6", "#E67E22", "#27AE60", "#3498DB", "#1ABC9C", "#F1C40F",
];

/// Fallback color for categories created without one.
pub const DEFAULT_CATEGORY_COLOR: &str = "#95A5A6";

// ---------------------------------------------------------------------------
// Seed Data
// ---------------------------------------------------------------------------

/// Starter subjects installed into an empty store: (name, label, color).
pub const DEFAULT_SUBJECTS: [(&str, &str, &str); 2] =
    [("Kid 1", "K1", "#FF6B6B"), ("Kid 2", "K2", "#4ECDC4")];

/// Starter categories installed into an empty store: (name, color, positive).
/// The polarity flag is advisory — it hints at the conventional sign of a
/// delta tagged with this category, it is never enforced.
pub const DEFAULT_CATEGORIES: [(&str, &str, bool); 5] = [
    ("TV", "#9B59B6", false),
    ("Snacks", "#E67E22", false),
    ("Chores", "#27AE60", true),
    ("Finish Food", "#3498DB", true),
    ("Clean Up", "#1ABC9C", true),
];
