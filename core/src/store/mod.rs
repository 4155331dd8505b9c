//! # Storage Module — Persistent Keyed Storage
//!
//! Everything Tally keeps on disk flows through [`db::TrackerDb`], the
//! sled-backed storage collaborator. Higher layers (registry, ledger,
//! sessions, queries) never touch sled directly — they speak in domain
//! types and let the engine own keys, encoding, and atomicity.

pub mod db;

pub use db::{DbError, DbResult, HistoryPolicy, TrackerDb};
