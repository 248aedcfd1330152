//! Authentication seam and session state.
//!
//! - [`AuthProvider`] - Session issuance (sign in/up/out, password reset)
//! - [`AuthSubscription`] - RAII handle over the provider's event stream
//! - [`AuthState`] - Application-side view of the signed-in user, fed by
//!   the event stream
//!
//! Auth state changes are delivered as messages rather than callbacks. A
//! subscription stops receiving as soon as its handle is dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ErpError, Result};

/// Role of an application user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserRole {
    /// Full access.
    #[serde(rename = "admin")]
    Admin,
    /// Day-to-day operator.
    #[default]
    #[serde(rename = "vendedor")]
    Seller,
}

/// An authenticated user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Identity-provider user id.
    pub id: String,
    /// Login e-mail.
    pub email: String,
    /// Display name.
    #[serde(rename = "nombre")]
    pub name: String,
    /// Contact phone.
    #[serde(rename = "telefono", default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Avatar image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Role.
    #[serde(default)]
    pub role: UserRole,
}

impl User {
    /// Builds a user from identity-provider metadata.
    ///
    /// The display name falls back to the e-mail's local part, then to
    /// "Usuario".
    #[must_use]
    pub fn from_metadata(id: impl Into<String>, email: impl Into<String>, metadata: &Value) -> Self {
        let email = email.into();
        let text = |field: &str| {
            metadata
                .get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let name = text("nombre")
            .or_else(|| {
                email
                    .split('@')
                    .next()
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "Usuario".to_string());

        Self {
            id: id.into(),
            name,
            phone: text("telefono"),
            avatar_url: text("avatar_url"),
            role: UserRole::Seller,
            email,
        }
    }
}

/// An issued session.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token for store calls.
    pub access_token: String,
    /// Token used to obtain a new access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// When the access token expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// The signed-in user.
    pub user: User,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user.id)
            .finish()
    }
}

/// A change in authentication state.
#[derive(Clone, Debug, PartialEq)]
pub enum AuthEvent {
    /// A user signed in.
    SignedIn(Session),
    /// The current user signed out.
    SignedOut,
    /// The access token was refreshed.
    TokenRefreshed(Session),
    /// The user's profile changed.
    UserUpdated(User),
    /// A password-recovery flow was started.
    PasswordRecovery,
}

/// Fan-out of [`AuthEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct AuthEvents {
    tx: broadcast::Sender<AuthEvent>,
}

impl AuthEvents {
    /// Default number of events buffered per subscriber.
    pub const DEFAULT_CAPACITY: usize = 32;

    /// Creates an event hub.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(Self::DEFAULT_CAPACITY);
        Self { tx }
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn emit(&self, event: AuthEvent) {
        debug!(?event, "Auth event");
        let _ = self.tx.send(event);
    }

    /// Opens a new subscription.
    #[must_use]
    pub fn subscribe(&self) -> AuthSubscription {
        AuthSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for AuthEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscription to auth events. Dropping it unsubscribes.
#[derive(Debug)]
pub struct AuthSubscription {
    rx: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    /// Waits for the next event. Returns `None` once the provider is gone.
    pub async fn next(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Auth subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Authentication service.
#[async_trait]
pub trait AuthProvider: Send + Sync + Debug {
    /// Returns the current session, if any.
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Subscribes to auth state changes.
    fn subscribe(&self) -> AuthSubscription;

    /// Signs in with e-mail and password.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    /// Registers a new user.
    async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<User>;

    /// Ends the current session.
    async fn sign_out(&self) -> Result<()>;

    /// Starts a password-reset flow for the e-mail.
    async fn reset_password(&self, email: &str) -> Result<()>;
}

/// The signed-in user as seen by the rest of the application.
///
/// Created from an [`AuthProvider`]; a background task folds the provider's
/// events into a [`watch`] channel. The task is aborted when the state is
/// dropped, which also drops the subscription.
#[derive(Debug)]
pub struct AuthState {
    user: watch::Receiver<Option<User>>,
    task: JoinHandle<()>,
}

impl AuthState {
    /// Loads the initial session and starts following auth events.
    pub async fn start(provider: Arc<dyn AuthProvider>) -> Result<Self> {
        // Subscribe before reading the session so no event is missed.
        let mut events = provider.subscribe();
        let initial = provider.get_session().await?.map(|s| s.user);
        let (tx, rx) = watch::channel(initial);

        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let user = match event {
                    AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => {
                        Some(session.user)
                    }
                    AuthEvent::UserUpdated(user) => Some(user),
                    AuthEvent::SignedOut => None,
                    AuthEvent::PasswordRecovery => continue,
                };
                tx.send_replace(user);
            }
        });

        Ok(Self { user: rx, task })
    }

    /// Returns the signed-in user, if any.
    #[must_use]
    pub fn current_user(&self) -> Option<User> {
        self.user.borrow().clone()
    }

    /// Returns the signed-in user or an [`ErpError::Auth`] error.
    pub fn require_user(&self) -> Result<User> {
        self.current_user()
            .ok_or_else(|| ErpError::Auth("Usuario no autenticado".to_string()))
    }

    /// Returns a receiver that observes every user change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<User>> {
        self.user.clone()
    }
}

impl Drop for AuthState {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct StubAuth {
        events: AuthEvents,
        session: Mutex<Option<Session>>,
    }

    fn session(id: &str) -> Session {
        Session {
            access_token: "token".to_string(),
            refresh_token: None,
            expires_at: None,
            user: User::from_metadata(id, format!("{id}@example.com"), &json!({})),
        }
    }

    #[async_trait]
    impl AuthProvider for StubAuth {
        async fn get_session(&self) -> Result<Option<Session>> {
            Ok(self.session.lock().unwrap().clone())
        }

        fn subscribe(&self) -> AuthSubscription {
            self.events.subscribe()
        }

        async fn sign_in(&self, email: &str, _password: &str) -> Result<Session> {
            let s = session(email.split('@').next().unwrap_or_default());
            *self.session.lock().unwrap() = Some(s.clone());
            self.events.emit(AuthEvent::SignedIn(s.clone()));
            Ok(s)
        }

        async fn sign_up(&self, email: &str, _password: &str, name: &str) -> Result<User> {
            Ok(User::from_metadata("new", email, &json!({ "nombre": name })))
        }

        async fn sign_out(&self) -> Result<()> {
            *self.session.lock().unwrap() = None;
            self.events.emit(AuthEvent::SignedOut);
            Ok(())
        }

        async fn reset_password(&self, _email: &str) -> Result<()> {
            self.events.emit(AuthEvent::PasswordRecovery);
            Ok(())
        }
    }

    #[test]
    fn test_user_name_fallbacks() {
        let named = User::from_metadata("1", "ana@example.com", &json!({ "nombre": "Ana" }));
        assert_eq!(named.name, "Ana");
        let from_email = User::from_metadata("2", "luis@example.com", &json!({}));
        assert_eq!(from_email.name, "luis");
        let anonymous = User::from_metadata("3", "", &json!({}));
        assert_eq!(anonymous.name, "Usuario");
        assert_eq!(anonymous.role, UserRole::Seller);
    }

    #[test]
    fn test_session_debug_redacts_token() {
        let rendered = format!("{:?}", session("ana"));
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("token\""));
    }

    #[tokio::test]
    async fn test_auth_state_follows_events() {
        let provider = Arc::new(StubAuth::default());
        let state = AuthState::start(provider.clone()).await.unwrap();
        assert!(state.current_user().is_none());
        assert!(matches!(state.require_user(), Err(ErpError::Auth(_))));

        let mut watch = state.watch();
        provider.sign_in("ana@example.com", "pw").await.unwrap();
        watch.changed().await.unwrap();
        assert_eq!(state.require_user().unwrap().id, "ana");

        provider.sign_out().await.unwrap();
        watch.changed().await.unwrap();
        assert!(state.current_user().is_none());
    }

    #[tokio::test]
    async fn test_dropping_state_unsubscribes() {
        let provider = Arc::new(StubAuth::default());
        let state = AuthState::start(provider.clone()).await.unwrap();
        assert_eq!(provider.events.subscriber_count(), 1);
        drop(state);
        // Let the aborted task unwind and release its receiver.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(provider.events.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_ends_when_hub_dropped() {
        let events = AuthEvents::new();
        let mut sub = events.subscribe();
        events.emit(AuthEvent::SignedOut);
        drop(events);
        assert_eq!(sub.next().await, Some(AuthEvent::SignedOut));
        assert_eq!(sub.next().await, None);
    }
}
