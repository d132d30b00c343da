//! Operator sessions and credential checks.
//!
//! A single shared operator identity is configured in `[auth]`. The password
//! is never stored: the config carries `hex(HMAC-SHA256(salt, password))`
//! and [`StaticCredentialVerifier`] recomputes and compares it in constant
//! time.
//!
//! Sessions live in memory with a fixed TTL. The browser-facing id travels
//! in a signed cookie (`refinery_eye_session=<id>.<sig>`); a cookie whose
//! signature does not verify is treated as no cookie at all.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use refinery_eye_core::{InspectError, Result};

use crate::config::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "refinery_eye_session";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub authenticated: bool,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.authenticated && now < self.expires_at
    }
}

/// Checks a username/password pair.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, username: &str, password: &str) -> bool;
}

/// The single configured operator identity.
pub struct StaticCredentialVerifier {
    username: String,
    salt: Vec<u8>,
    password_hash: Vec<u8>,
}

impl StaticCredentialVerifier {
    pub fn new(username: impl Into<String>, salt_hex: &str, password_hash_hex: &str) -> Result<Self> {
        let salt = hex::decode(salt_hex)
            .map_err(|e| InspectError::Config(format!("auth.salt is not hex: {}", e)))?;
        let password_hash = hex::decode(password_hash_hex)
            .map_err(|e| InspectError::Config(format!("auth.password_hash is not hex: {}", e)))?;
        Ok(Self {
            username: username.into(),
            salt,
            password_hash,
        })
    }

    pub fn from_config(auth: &AuthConfig) -> Result<Self> {
        Self::new(auth.username.clone(), &auth.salt, &auth.password_hash)
    }
}

impl CredentialVerifier for StaticCredentialVerifier {
    fn verify(&self, username: &str, password: &str) -> bool {
        let mut mac = keyed(&self.salt);
        mac.update(password.as_bytes());
        // Always run the digest comparison so a wrong username costs the same.
        let password_ok = mac.verify_slice(&self.password_hash).is_ok();
        password_ok && username == self.username
    }
}

fn keyed(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC can take key of any size")
}

/// `hex(HMAC-SHA256(salt, password))`, the value stored in `auth.password_hash`.
pub fn hash_password(password: &str, salt_hex: &str) -> Result<String> {
    let salt = hex::decode(salt_hex)
        .map_err(|e| InspectError::bad_request(format!("salt is not hex: {}", e)))?;
    let mut mac = keyed(&salt);
    mac.update(password.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// 16 random bytes, hex encoded.
pub fn generate_salt() -> String {
    random_hex(16)
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// In-memory session table.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`login`](SessionStore::login) | Verify credentials and open a session |
/// | [`logout`](SessionStore::logout) | Drop a session (idempotent) |
/// | [`status`](SessionStore::status) | Is the session live? Evicts expired ones |
/// | [`get`](SessionStore::get) | Fetch a live session |
pub struct SessionStore {
    verifier: Box<dyn CredentialVerifier>,
    ttl: ChronoDuration,
    secret: Vec<u8>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(verifier: Box<dyn CredentialVerifier>, ttl: Duration, secret: Vec<u8>) -> Self {
        Self {
            verifier,
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::days(1)),
            secret,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Build from `[auth]`, reading the cookie secret from the configured
    /// environment variable. Without it a random per-process secret is used.
    pub fn from_config(auth: &AuthConfig) -> Result<Self> {
        let verifier = StaticCredentialVerifier::from_config(auth)?;
        let secret = match std::env::var(&auth.session_secret_env) {
            Ok(s) if !s.is_empty() => s.into_bytes(),
            _ => {
                tracing::warn!(
                    env = %auth.session_secret_env,
                    "session secret not set; sessions will not survive a restart"
                );
                random_hex(32).into_bytes()
            }
        };
        Ok(Self::new(Box::new(verifier), auth.session_ttl(), secret))
    }

    pub fn login(&self, username: &str, password: &str) -> Result<Session> {
        if !self.verifier.verify(username, password) {
            tracing::info!(username, "login rejected");
            return Err(InspectError::InvalidCredentials);
        }
        let now = Utc::now();
        let session = Session {
            id: random_hex(24),
            authenticated: true,
            username: username.to_string(),
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.sessions
            .write()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        tracing::info!(username, "operator logged in");
        Ok(session)
    }

    pub fn logout(&self, session_id: &str) {
        self.sessions.write().unwrap().remove(session_id);
    }

    pub fn status(&self, session_id: &str) -> bool {
        self.get(session_id).is_some()
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read().unwrap();
            match sessions.get(session_id) {
                Some(s) if s.is_live(now) => return Some(s.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.sessions.write().unwrap().remove(session_id);
        None
    }

    /// Live session for `id` or `Unauthorized`.
    pub fn require(&self, session_id: Option<&str>) -> Result<Session> {
        session_id
            .and_then(|id| self.get(id))
            .ok_or(InspectError::Unauthorized)
    }

    /// Cookie value `<id>.<hex sig>`.
    pub fn sign(&self, session_id: &str) -> String {
        let mut mac = keyed(&self.secret);
        mac.update(session_id.as_bytes());
        format!("{}.{}", session_id, hex::encode(mac.finalize().into_bytes()))
    }

    /// Session id from a signed cookie value, if the signature holds.
    pub fn verify_cookie<'a>(&self, value: &'a str) -> Option<&'a str> {
        let (id, sig) = value.rsplit_once('.')?;
        let sig = hex::decode(sig).ok()?;
        let mut mac = keyed(&self.secret);
        mac.update(id.as_bytes());
        mac.verify_slice(&sig).ok().map(|_| id)
    }

    /// `Set-Cookie` value for a fresh session.
    pub fn cookie_header(&self, session: &Session) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE,
            self.sign(&session.id),
            self.ttl.num_seconds()
        )
    }

    /// `Set-Cookie` value that clears the cookie.
    pub fn clear_cookie_header() -> String {
        format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
    }

    /// Session id carried by a raw `Cookie` header, if signed correctly.
    pub fn session_from_cookie_header(&self, header: &str) -> Option<String> {
        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .and_then(|(_, value)| self.verify_cookie(value))
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl: Duration) -> SessionStore {
        let salt = "0a0b0c0d";
        let hash = hash_password("hunter2", salt).unwrap();
        let verifier = StaticCredentialVerifier::new("inspector", salt, &hash).unwrap();
        SessionStore::new(Box::new(verifier), ttl, b"test-secret".to_vec())
    }

    #[test]
    fn login_logout_status() {
        let sessions = store(Duration::from_secs(60));
        let s = sessions.login("inspector", "hunter2").unwrap();
        assert!(sessions.status(&s.id));
        sessions.logout(&s.id);
        assert!(!sessions.status(&s.id));
        // Idempotent.
        sessions.logout(&s.id);
    }

    #[test]
    fn wrong_password_or_user_is_invalid_credentials() {
        let sessions = store(Duration::from_secs(60));
        assert_eq!(
            sessions.login("inspector", "nope").unwrap_err(),
            InspectError::InvalidCredentials
        );
        assert_eq!(
            sessions.login("admin", "hunter2").unwrap_err(),
            InspectError::InvalidCredentials
        );
    }

    #[test]
    fn expired_sessions_are_evicted() {
        let sessions = store(Duration::from_millis(1));
        let s = sessions.login("inspector", "hunter2").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!sessions.status(&s.id));
        assert!(sessions.sessions.read().unwrap().is_empty());
        assert_eq!(sessions.require(Some(&s.id)).unwrap_err(), InspectError::Unauthorized);
    }

    #[test]
    fn tampered_cookie_is_ignored() {
        let sessions = store(Duration::from_secs(60));
        let s = sessions.login("inspector", "hunter2").unwrap();
        let header = format!("theme=dark; {}={}", SESSION_COOKIE, sessions.sign(&s.id));
        assert_eq!(sessions.session_from_cookie_header(&header), Some(s.id.clone()));

        let forged = format!("{}={}.deadbeef", SESSION_COOKIE, s.id);
        assert_eq!(sessions.session_from_cookie_header(&forged), None);
    }

    #[test]
    fn hash_password_is_deterministic_per_salt() {
        let a = hash_password("pw", "01").unwrap();
        assert_eq!(a, hash_password("pw", "01").unwrap());
        assert_ne!(a, hash_password("pw", "02").unwrap());
        assert!(hash_password("pw", "zz").is_err());
    }
}
