//! GoTrue auth API.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use erp_core::{
    AuthEvent, AuthEvents, AuthProvider, AuthSubscription, ErpError, Result, Session, User,
};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Mutex;
use tracing::{info, instrument};

use crate::client::RestClient;

#[derive(Debug, Deserialize)]
struct RemoteUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Value,
}

impl RemoteUser {
    fn into_user(self) -> User {
        User::from_metadata(self.id, self.email.unwrap_or_default(), &self.user_metadata)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: RemoteUser,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|at| DateTime::from_timestamp(at, 0))
            .or_else(|| {
                self.expires_in
                    .and_then(Duration::try_seconds)
                    .map(|ttl| now + ttl)
            });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user.into_user(),
        }
    }
}

/// Sign-up returns either a bare user or a session wrapping one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(RemoteUser),
}

/// [`AuthProvider`] over the hosted auth API.
///
/// A successful sign-in installs the access token on the shared
/// [`RestClient`], so subsequent table calls are made as that user.
#[derive(Debug)]
pub struct RestAuth {
    client: RestClient,
    events: AuthEvents,
    session: Mutex<Option<Session>>,
}

impl RestAuth {
    pub(crate) fn new(client: RestClient) -> Self {
        Self {
            client,
            events: AuthEvents::new(),
            session: Mutex::new(None),
        }
    }

    fn replace_session(&self, session: Option<Session>) -> Result<()> {
        self.client
            .set_token(session.as_ref().map(|s| s.access_token.clone()));
        let mut current = self
            .session
            .lock()
            .map_err(|e| ErpError::Auth(e.to_string()))?;
        *current = session;
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for RestAuth {
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
        let url = self.client.config().auth_url("token");
        let request = self
            .client
            .request(Method::POST, &url)
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));
        let response = self.client.send("auth", request).await?;
        let token: TokenResponse = serde_json::from_value(RestClient::json(response).await?)?;
        let session = token.into_session(Utc::now());

        self.replace_session(Some(session.clone()))?;
        info!(user_id = %session.user.id, "Signed in");
        self.events.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    #[instrument(skip(self, password))]
    async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<User> {
        let url = self.client.config().auth_url("signup");
        let request = self.client.request(Method::POST, &url).json(&json!({
            "email": email,
            "password": password,
            "data": { "nombre": name },
        }));
        let response = self.client.send("auth", request).await?;
        let body: SignUpResponse = serde_json::from_value(RestClient::json(response).await?)?;
        Ok(match body {
            SignUpResponse::Session(token) => token.user.into_user(),
            SignUpResponse::User(user) => user.into_user(),
        })
    }

    async fn sign_out(&self) -> Result<()> {
        if self.client.token().is_some() {
            let url = self.client.config().auth_url("logout");
            let request = self.client.request(Method::POST, &url);
            self.client.send("auth", request).await?;
        }
        self.replace_session(None)?;
        self.events.emit(AuthEvent::SignedOut);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reset_password(&self, email: &str) -> Result<()> {
        let url = self.client.config().auth_url("recover");
        let request = self
            .client
            .request(Method::POST, &url)
            .json(&json!({ "email": email }));
        self.client.send("auth", request).await?;
        self.events.emit(AuthEvent::PasswordRecovery);
        Ok(())
    }
}
