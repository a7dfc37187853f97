//! Admin accounts and bearer-token sessions for the publishing console.

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::http::StatusCode;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{MIN_PASSWORD_LEN, SESSION_DURATION_SECS};
use crate::db::models::UserRow;

const SESSION_EVENTS_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("user already exists: {0}")]
    UserAlreadyExists(String),

    #[error("password too weak: {0}")]
    WeakPassword(String),

    #[error("invalid email: {0}")]
    InvalidEmail(String),

    #[error("account creation is disabled")]
    SignupDisabled,

    #[error("not signed in")]
    SignedOut,

    #[error("session expired")]
    SessionExpired,

    #[error("auth backend error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials | AuthError::SignedOut | AuthError::SessionExpired => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::UserAlreadyExists(_) => StatusCode::CONFLICT,
            AuthError::WeakPassword(_) | AuthError::InvalidEmail(_) => StatusCode::BAD_REQUEST,
            AuthError::SignupDisabled => StatusCode::FORBIDDEN,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        AuthError::Internal(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: i64,
    pub email: String,
}

#[derive(Debug, Clone)]
struct Session {
    identity: Identity,
    /// Unix seconds.
    expires_at: i64,
}

/// Returned by sign-up and sign-in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    pub token: String,
    pub email: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Identity),
    SignedOut(Identity),
}

// ---------------------------------------------------------------------------
// AuthService
// ---------------------------------------------------------------------------

pub struct AuthService {
    pool: SqlitePool,
    /// token → live session
    sessions: DashMap<String, Session>,
    events: broadcast::Sender<SessionEvent>,
    allow_signup: bool,
}

impl AuthService {
    pub fn new(pool: SqlitePool, allow_signup: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(SESSION_EVENTS_CAPACITY);
        Arc::new(Self {
            pool,
            sessions: DashMap::new(),
            events,
            allow_signup,
        })
    }

    /// Create an admin account and sign it in.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SessionGrant, AuthError> {
        if !self.allow_signup {
            return Err(AuthError::SignupDisabled);
        }
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword(format!(
                "at least {MIN_PASSWORD_LEN} characters required"
            )));
        }

        let password_hash = hash_password(password.to_string()).await?;
        let inserted = sqlx::query(
            "INSERT INTO users (email, password_hash, created_at) VALUES (?, ?, ?)",
        )
        .bind(&email)
        .bind(&password_hash)
        .bind(current_timestamp())
        .execute(&self.pool)
        .await;

        let user_id = match inserted {
            Ok(res) => res.last_insert_rowid(),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(AuthError::UserAlreadyExists(email));
            }
            Err(e) => return Err(e.into()),
        };

        info!(user_id, email = %email, "Admin account created");
        Ok(self.open_session(Identity { user_id, email }))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionGrant, AuthError> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, password_hash, created_at FROM users WHERE email = ?",
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;

        let Some(user) = row else {
            warn!(email = %email, "Sign-in for unknown account");
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(password.to_string(), user.password_hash).await? {
            warn!(email = %email, "Sign-in with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        Ok(self.open_session(Identity {
            user_id: user.id,
            email: user.email,
        }))
    }

    /// End a session. Returns false when the token was not signed in.
    pub fn sign_out(&self, token: &str) -> bool {
        match self.sessions.remove(token) {
            Some((_, session)) => {
                info!(email = %session.identity.email, "Admin signed out");
                let _ = self.events.send(SessionEvent::SignedOut(session.identity));
                true
            }
            None => false,
        }
    }

    /// Who holds `token`. Expired sessions are dropped on lookup.
    pub fn identity(&self, token: &str) -> Result<Identity, AuthError> {
        let session = self
            .sessions
            .get(token)
            .map(|s| s.clone())
            .ok_or(AuthError::SignedOut)?;

        if session.expires_at <= current_timestamp() {
            self.sessions.remove(token);
            let _ = self.events.send(SessionEvent::SignedOut(session.identity));
            return Err(AuthError::SessionExpired);
        }
        Ok(session.identity)
    }

    /// Identity changes across all sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop every expired session, looked up or not. Returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = current_timestamp();
        let mut expired = Vec::new();
        self.sessions.retain(|_, session| {
            let live = session.expires_at > now;
            if !live {
                expired.push(session.identity.clone());
            }
            live
        });
        for identity in &expired {
            debug!(email = %identity.email, "Expired admin session swept");
            let _ = self.events.send(SessionEvent::SignedOut(identity.clone()));
        }
        expired.len()
    }

    fn open_session(&self, identity: Identity) -> SessionGrant {
        self.sweep_expired();
        let token = generate_token();
        let expires_at = current_timestamp() + SESSION_DURATION_SECS;
        self.sessions.insert(
            token.clone(),
            Session {
                identity: identity.clone(),
                expires_at,
            },
        );
        info!(email = %identity.email, "Admin signed in");
        let email = identity.email.clone();
        let _ = self.events.send(SessionEvent::SignedIn(identity));
        SessionGrant {
            token,
            email,
            expires_at,
        }
    }

    #[cfg(test)]
    fn expire_all(&self) {
        for mut session in self.sessions.iter_mut() {
            session.expires_at = 0;
        }
    }
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.contains(char::is_whitespace) =>
        {
            Ok(email)
        }
        _ => Err(AuthError::InvalidEmail(email)),
    }
}

async fn hash_password(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || {
        let salt_bytes: [u8; 16] = rand::thread_rng().gen();
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Internal(e.to_string()))
    })
    .await
    .map_err(|e| AuthError::Internal(e.to_string()))?
}

async fn verify_password(password: String, hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash).map_err(|e| AuthError::Internal(e.to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| AuthError::Internal(e.to_string()))?
}

fn generate_token() -> String {
    let bytes: [u8; 24] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Unix seconds.
fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
