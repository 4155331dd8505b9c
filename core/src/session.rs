//! # Session Store
//!
//! Issues, persists, and validates the opaque bearer tokens handed out
//! after a successful shared-secret exchange. Sessions are the "remember
//! this device" mechanism: the secret is typed once, the token rides every
//! mutating request thereafter.
//!
//! ## Token Model
//!
//! A token is 32 bytes from the OS CSPRNG, hex-rendered to a fixed 64-char
//! string. Global uniqueness follows from the entropy — at 256 bits, a
//! collision or a successful guess is not a practical concern.
//!
//! Sessions are never mutated: validity is the pure predicate
//! `now < expires_at` over the stored record. There is no per-user binding
//! — every session represents the same single shared-secret identity, and
//! any number of them may be live at once.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config;
use crate::store::{DbError, TrackerDb};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while issuing or purging sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The underlying store failed.
    #[error("storage error: {0}")]
    Db(#[from] DbError),
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One issued bearer session.
///
/// Immutable once created. Removed (or simply ignored) after expiry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    /// The opaque token. Fixed-length hex, 256 bits of entropy.
    pub token: String,

    /// When this session was issued (UTC).
    pub created_at: DateTime<Utc>,

    /// The instant at which this session stops being valid. Validity is
    /// strict: a session is live iff `now < expires_at`.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Returns `true` if this session is still valid at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Issues and validates sessions against the persistent store.
///
/// Cheap to clone — shares the underlying `TrackerDb`.
#[derive(Clone)]
pub struct SessionStore {
    db: Arc<TrackerDb>,
    ttl_days: i64,
}

impl SessionStore {
    /// Creates a store with the default one-year session lifetime.
    pub fn new(db: Arc<TrackerDb>) -> Self {
        Self::with_ttl_days(db, config::SESSION_TTL_DAYS)
    }

    /// Creates a store with an explicit lifetime. Used by tests to exercise
    /// expiry without waiting a year.
    pub fn with_ttl_days(db: Arc<TrackerDb>, ttl_days: i64) -> Self {
        Self { db, ttl_days }
    }

    /// Generates, persists, and returns a fresh session.
    pub fn issue(&self) -> Result<Session, SessionError> {
        let mut bytes = [0u8; config::SESSION_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);

        let created_at = Utc::now();
        let session = Session {
            token: hex::encode(bytes),
            created_at,
            expires_at: created_at + Duration::days(self.ttl_days),
        };
        self.db.put_session(&session)?;

        tracing::debug!(expires_at = %session.expires_at, "session issued");
        Ok(session)
    }

    /// Returns `true` iff `token` names a stored, unexpired session.
    ///
    /// Fails closed: missing, empty, malformed, unknown, and expired
    /// tokens are all simply invalid, and a storage failure during lookup
    /// is treated as invalid too (logged, never propagated — an attacker
    /// should not be able to distinguish "broken" from "wrong").
    pub fn is_valid(&self, token: &str) -> bool {
        if token.len() != config::SESSION_TOKEN_LEN {
            return false;
        }
        match self.db.get_session(token) {
            Ok(Some(session)) => session.is_live_at(Utc::now()),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("session lookup failed: {e}");
                false
            }
        }
    }

    /// Removes sessions whose expiry has already passed. Returns how many
    /// were removed.
    ///
    /// Idempotent and safe to run at any time; correctness never depends
    /// on it (validation checks expiry itself), it only reclaims storage.
    /// Only sessions this call itself read as expired are removed, so a
    /// concurrently issued or still-valid session can never be purged.
    pub fn purge_expired(&self) -> Result<usize, SessionError> {
        let now = Utc::now();
        let mut purged = 0;
        for session in self.db.list_sessions()? {
            if !session.is_live_at(now) && self.db.remove_session(&session.token)? {
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::info!(purged, "expired sessions purged");
        }
        Ok(purged)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
