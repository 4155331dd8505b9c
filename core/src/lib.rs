// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tally — Core Library
//!
//! The household points ledger: an append-only record of every point a
//! kid earns or spends, with running balances kept exactly in sync. One
//! shared secret guards the write paths; everything else is readable by
//! whoever is on the couch.
//!
//! ## Architecture
//!
//! The crate is split into modules that mirror the actual concerns of a
//! small ledger service:
//!
//! - **store** — Persistent storage engine over sled. All disk I/O.
//! - **registry** — Subject ("kid") and category ("tag") records.
//! - **ledger** — The single write path: atomic signed-delta application.
//! - **query** — Read-only display views: balances, tags, history feed.
//! - **session** — Bearer-token issuance and validation.
//! - **auth** — The gate in front of every mutating operation.
//! - **config** — System constants and seeded defaults.
//!
//! ## Design Philosophy
//!
//! 1. The history is the truth; balances are a cache it can always rebuild.
//! 2. Entries are append-only. Corrections are compensating deltas.
//! 3. Writes are gated, reads are free. A scoreboard is meant to be seen.
//! 4. If it touches a balance, it happens in one transaction. No torn
//!    updates, ever.

pub mod auth;
pub mod config;
pub mod ledger;
pub mod query;
pub mod registry;
pub mod session;
pub mod store;

pub use auth::{AuthGate, Credentials};
pub use ledger::{Applied, BalancePolicy, LedgerEntry, LedgerError, LedgerService};
pub use query::{HistoryFilter, HistoryRow, Queries, SubjectRef};
pub use registry::{Category, EntityRegistry, RegistryError, Subject, SubjectDraft};
pub use session::{Session, SessionError, SessionStore};
pub use store::{DbError, HistoryPolicy, TrackerDb};
