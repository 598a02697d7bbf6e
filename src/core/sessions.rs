//! Session and QR-session tokens.
//!
//! Both families map an opaque token to its expiry instant. Expiry is lazy:
//! a token is checked when presented and never swept, so stale entries stay
//! in memory until the process restarts.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::{Rng, RngCore, distributions::Alphanumeric, rngs::OsRng};
use std::collections::HashMap;

const SESSION_TOKEN_BYTES: usize = 24;
const QR_TOKEN_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFamily {
    /// Long URL-safe tokens issued by a credential or face login.
    Session,
    /// Short alphanumeric tokens that fit in a displayed QR code.
    Qr,
}

impl TokenFamily {
    fn generate(self) -> String {
        match self {
            TokenFamily::Session => generate_url_token(),
            TokenFamily::Qr => OsRng
                .sample_iter(&Alphanumeric)
                .take(QR_TOKEN_LEN)
                .map(char::from)
                .collect(),
        }
    }
}

/// Random 24-byte token, URL-safe base64. Also used for approval links.
pub fn generate_url_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// True iff the token was found and its expiry is still in the future.
pub fn is_live(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(expires_at, Some(expires_at) if expires_at > now)
}

/// Backing map for one token family.
pub trait TokenStore: Send + Sync {
    fn put(&self, token: String, expires_at: DateTime<Utc>);
    fn get(&self, token: &str) -> Option<DateTime<Utc>>;
    /// Drop the entry if it has expired; returns whether it was removed.
    fn remove_if_expired(&self, token: &str, now: DateTime<Utc>) -> bool;
}

#[derive(Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryTokenStore {
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl TokenStore for MemoryTokenStore {
    fn put(&self, token: String, expires_at: DateTime<Utc>) {
        self.entries.lock().insert(token, expires_at);
    }

    fn get(&self, token: &str) -> Option<DateTime<Utc>> {
        self.entries.lock().get(token).copied()
    }

    fn remove_if_expired(&self, token: &str, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(token) {
            Some(&expires_at) if !is_live(Some(expires_at), now) => {
                entries.remove(token);
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

pub struct SessionRegistry {
    sessions: Box<dyn TokenStore>,
    qr_sessions: Box<dyn TokenStore>,
    session_ttl: u64,
    qr_ttl: u64,
}

impl SessionRegistry {
    pub fn new(session_ttl: u64, qr_ttl: u64) -> Self {
        Self::with_stores(
            Box::<MemoryTokenStore>::default(),
            Box::<MemoryTokenStore>::default(),
            session_ttl,
            qr_ttl,
        )
    }

    pub fn with_stores(
        sessions: Box<dyn TokenStore>,
        qr_sessions: Box<dyn TokenStore>,
        session_ttl: u64,
        qr_ttl: u64,
    ) -> Self {
        Self { sessions, qr_sessions, session_ttl, qr_ttl }
    }

    fn family(&self, family: TokenFamily) -> (&dyn TokenStore, u64) {
        match family {
            TokenFamily::Session => (self.sessions.as_ref(), self.session_ttl),
            TokenFamily::Qr => (self.qr_sessions.as_ref(), self.qr_ttl),
        }
    }

    pub fn issue(&self, family: TokenFamily) -> IssuedToken {
        self.issue_at(family, Utc::now())
    }

    pub fn issue_at(&self, family: TokenFamily, now: DateTime<Utc>) -> IssuedToken {
        let (store, ttl) = self.family(family);

        // Short QR tokens can collide; re-roll until unseen
        let token = loop {
            let candidate = family.generate();
            if store.get(&candidate).is_none() {
                break candidate;
            }
        };

        let expires_at = expiry_after(now, ttl);
        store.put(token.clone(), expires_at);
        tracing::debug!(?family, expires_at = %expires_at, "issued token");

        IssuedToken { token, expires_at, ttl_seconds: ttl }
    }

    pub fn validate(&self, family: TokenFamily, token: &str) -> bool {
        self.validate_at(family, token, Utc::now())
    }

    pub fn validate_at(&self, family: TokenFamily, token: &str, now: DateTime<Utc>) -> bool {
        let (store, _) = self.family(family);
        is_live(store.get(token), now)
    }

    /// Lock control accepts a token from either family.
    pub fn validate_any(&self, token: &str) -> bool {
        let now = Utc::now();
        self.validate_at(TokenFamily::Session, token, now) || self.validate_at(TokenFamily::Qr, token, now)
    }
}

/// `now + ttl_seconds`, saturating at the latest representable instant.
pub fn expiry_after(now: DateTime<Utc>, ttl_seconds: u64) -> DateTime<Utc> {
    i64::try_from(ttl_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
