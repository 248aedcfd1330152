//! Local auth provider over the store's `users` table.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use erp_core::{
    AuthEvent, AuthEvents, AuthProvider, AuthSubscription, ErpError, Result, Session, User,
};
use rusqlite::{OptionalExtension, params};
use serde_json::{Value, json};
use std::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::sqlite::{SqliteStore, sql_err, timestamp};

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Lifetime of an issued access token, in hours.
pub const SESSION_TTL_HOURS: i64 = 1;

/// Hashes a password into a PHC string (`$argon2id$v=19$...`) carrying
/// its own salt and parameters.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| ErpError::Other(format!("Failed to generate salt: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ErpError::Other(format!("Failed to hash password: {e}")))
}

/// Checks a password against a stored PHC string.
fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| ErpError::Other(format!("Corrupt password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// E-mail/password auth stored next to the data.
///
/// Emits [`AuthEvent`]s on sign-in, sign-out and password recovery. Holds
/// at most one session at a time.
#[derive(Debug)]
pub struct LocalAuth {
    store: SqliteStore,
    events: AuthEvents,
    session: Mutex<Option<Session>>,
}

impl LocalAuth {
    pub(crate) fn new(store: SqliteStore) -> Self {
        Self {
            store,
            events: AuthEvents::new(),
            session: Mutex::new(None),
        }
    }

    fn set_session(&self, session: Option<Session>) -> Result<()> {
        let mut current = self
            .session
            .lock()
            .map_err(|e| ErpError::Auth(e.to_string()))?;
        *current = session;
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for LocalAuth {
    async fn get_session(&self) -> Result<Option<Session>> {
        let current = self
            .session
            .lock()
            .map_err(|e| ErpError::Auth(e.to_string()))?;
        let now = Utc::now();
        Ok(current
            .as_ref()
            .filter(|s| s.expires_at.is_none_or(|at| at > now))
            .cloned())
    }

    fn subscribe(&self) -> AuthSubscription {
        self.events.subscribe()
    }

    #[instrument(skip(self, password))]
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let email = normalize_email(email);
        let row: Option<(String, String, String)> = {
            let conn = self.store.lock()?;
            conn.query_row(
                "SELECT id, password_hash, metadata FROM users WHERE email = ?1",
                params![email],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(sql_err)?
        };
        let Some((id, stored_hash, metadata)) = row else {
            return Err(ErpError::Auth("Invalid login credentials".to_string()));
        };
        if !verify_password(password, &stored_hash)? {
            return Err(ErpError::Auth("Invalid login credentials".to_string()));
        }

        let metadata: Value = serde_json::from_str(&metadata)?;
        let session = Session {
            access_token: Uuid::new_v4().to_string(),
            refresh_token: Some(Uuid::new_v4().to_string()),
            expires_at: Some(Utc::now() + Duration::hours(SESSION_TTL_HOURS)),
            user: User::from_metadata(id, email, &metadata),
        };
        self.set_session(Some(session.clone()))?;
        info!(user_id = %session.user.id, "Signed in");
        self.events.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    #[instrument(skip(self, password))]
    async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<User> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(ErpError::Validation(format!("Invalid e-mail: {email}")));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ErpError::Validation(format!(
                "Password must have at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let id = Uuid::new_v4().to_string();
        let password_hash = hash_password(password)?;
        let metadata = json!({ "nombre": name.trim() });
        {
            let conn = self.store.lock()?;
            conn.execute(
                "INSERT INTO users (id, email, password_hash, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    email,
                    password_hash,
                    metadata.to_string(),
                    timestamp(Utc::now())
                ],
            )
            .map_err(|e| match sql_err(e) {
                ErpError::Conflict(_) => {
                    ErpError::Conflict(format!("User already registered: {email}"))
                }
                other => other,
            })?;
        }
        debug!(user_id = %id, "User registered");
        Ok(User::from_metadata(id, email, &metadata))
    }

    async fn sign_out(&self) -> Result<()> {
        self.set_session(None)?;
        self.events.emit(AuthEvent::SignedOut);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reset_password(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        let known = {
            let conn = self.store.lock()?;
            conn.query_row(
                "SELECT 1 FROM users WHERE email = ?1",
                params![email],
                |_| Ok(()),
            )
            .optional()
            .map_err(sql_err)?
            .is_some()
        };
        // Unknown addresses succeed silently.
        if known {
            self.events.emit(AuthEvent::PasswordRecovery);
        }
        Ok(())
    }
}
