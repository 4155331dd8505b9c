//! # Auth Gate
//!
//! The single policy deciding whether a mutating request is allowed in.
//! Two parallel credential channels, evaluated in order:
//!
//! 1. a bearer session token, checked against the [`SessionStore`];
//! 2. the shared secret, compared (after trimming surrounding whitespace)
//!    against the configured value.
//!
//! A present-but-invalid token does **not** short-circuit — the secret is
//! still tried as a fallback, so a client with a stale token and the right
//! password gets in. Read-only queries never pass through this gate.
//!
//! ## Trust model
//!
//! Deliberately flat: there is exactly one identity, "someone who knows
//! the secret". Anyone holding the secret or a live token has full
//! mutation rights. There are no per-user accounts and no permission
//! tiers — this protects a family points board, not a bank.
//!
//! ## Timing
//!
//! The secret comparison hashes both sides with SHA-256 and compares the
//! fixed-length digests, so comparison time is independent of how many
//! leading characters of a guess happen to match.

use sha2::{Digest, Sha256};

use crate::session::SessionStore;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// The credential material extracted from one mutating request.
///
/// Both channels are optional and independent; either can authorize alone.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    /// Bearer session token, if the request carried one.
    pub token: Option<String>,
    /// Shared secret, if the request carried one.
    pub secret: Option<String>,
}

impl Credentials {
    /// Credentials with only a session token.
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            secret: None,
        }
    }

    /// Credentials with only the shared secret.
    pub fn secret(secret: impl Into<String>) -> Self {
        Self {
            token: None,
            secret: Some(secret.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthGate
// ---------------------------------------------------------------------------

/// Request-level authorization policy.
///
/// Holds a digest of the configured secret (never the secret itself) and
/// a handle to the session store. Cheap to clone.
#[derive(Clone)]
pub struct AuthGate {
    sessions: SessionStore,
    secret_digest: [u8; 32],
}

impl AuthGate {
    /// Builds a gate for the given shared secret.
    ///
    /// The secret is trimmed before digesting, mirroring the trim applied
    /// to presented values — a trailing newline from a password manager
    /// must not lock the whole household out.
    pub fn new(sessions: SessionStore, shared_secret: &str) -> Self {
        Self {
            sessions,
            secret_digest: digest(shared_secret.trim()),
        }
    }

    /// Evaluates the policy: `true` means the mutating request may proceed.
    pub fn authorize(&self, credentials: &Credentials) -> bool {
        if let Some(token) = credentials.token.as_deref() {
            if self.sessions.is_valid(token) {
                return true;
            }
            // Invalid token: fall through to the secret check.
        }

        match credentials.secret.as_deref() {
            Some(secret) => self.secret_matches(secret),
            None => false,
        }
    }

    /// Constant-time check of a presented secret against the configured
    /// one. Exposed so the authentication endpoint can verify the secret
    /// before issuing a session.
    pub fn secret_matches(&self, presented: &str) -> bool {
        digest(presented.trim()) == self.secret_digest
    }
}

fn digest(value: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TrackerDb;
    use std::sync::Arc;

    const SECRET: &str = "parent123";

    fn gate() -> (AuthGate, SessionStore) {
        let db = Arc::new(TrackerDb::open_temporary().unwrap());
        let sessions = SessionStore::new(db);
        (AuthGate::new(sessions.clone(), SECRET), sessions)
    }

    #[test]
    fn valid_token_authorizes() {
        let (gate, sessions) = gate();
        let session = sessions.issue().unwrap();
        assert!(gate.authorize(&Credentials::token(session.token)));
    }

    #[test]
    fn correct_secret_authorizes() {
        let (gate, _) = gate();
        assert!(gate.authorize(&Credentials::secret(SECRET)));
    }

    #[test]
    fn secret_is_trimmed_before_comparison() {
        let (gate, _) = gate();
        assert!(gate.authorize(&Credentials::secret("  parent123\n")));
    }

    #[test]
    fn invalid_token_falls_through_to_secret() {
        let (gate, _) = gate();
        let creds = Credentials {
            token: Some("0".repeat(64)),
            secret: Some(SECRET.to_string()),
        };
        assert!(gate.authorize(&creds), "bad token + good secret = allow");
    }

    #[test]
    fn denies_when_both_absent() {
        let (gate, _) = gate();
        assert!(!gate.authorize(&Credentials::default()));
    }

    #[test]
    fn denies_when_both_wrong() {
        let (gate, _) = gate();
        let creds = Credentials {
            token: Some("0".repeat(64)),
            secret: Some("wrong".to_string()),
        };
        assert!(!gate.authorize(&creds));
    }

    #[test]
    fn wrong_secret_alone_denies() {
        let (gate, _) = gate();
        assert!(!gate.authorize(&Credentials::secret("Parent123")));
        assert!(!gate.authorize(&Credentials::secret("")));
    }

    #[test]
    fn expired_session_token_denies_without_secret() {
        let db = Arc::new(TrackerDb::open_temporary().unwrap());
        let sessions = SessionStore::with_ttl_days(Arc::clone(&db), 0);
        let gate = AuthGate::new(sessions.clone(), SECRET);

        // TTL of zero days: the session is expired the moment it exists.
        let session = sessions.issue().unwrap();
        assert!(!gate.authorize(&Credentials::token(session.token)));
    }

    #[test]
    fn configured_secret_with_whitespace_still_matches() {
        let db = Arc::new(TrackerDb::open_temporary().unwrap());
        let sessions = SessionStore::new(db);
        let gate = AuthGate::new(sessions, " parent123 ");
        assert!(gate.secret_matches("parent123"));
    }
}
