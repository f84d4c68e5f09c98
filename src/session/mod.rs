//! Anonymous session management
//!
//! A [`SessionManager`] establishes one anonymous identity for the lifetime
//! of the client and publishes it as a reactive [`SessionState`]. The
//! identity itself comes from an [`IdentityProvider`]; [`LocalIdentityProvider`]
//! is the bundled implementation.
//!
//! The state machine is
//! `Unauthenticated -> Authenticating -> Authenticated | Failed`, and both
//! end states are terminal for the process.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::error::{EchoesError, Result, AUTH_FAILED_STATUS};
use crate::state::Observable;

pub mod local;

pub use local::LocalIdentityProvider;

/// An identity returned by an [`IdentityProvider`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque user id used as `authorId` on writes
    pub uid: String,
    /// Whether the identity came from anonymous sign-in
    pub is_anonymous: bool,
}

/// The anonymous session held by this process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    identity: Identity,
    established_at: DateTime<Utc>,
}

impl Session {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            established_at: Utc::now(),
        }
    }

    /// The id recorded as `authorId` on posts.
    pub fn uid(&self) -> &str {
        &self.identity.uid
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity.uid)
    }
}

/// Reactive session value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated(Session),
    /// Terminal; carries the provider's failure message
    Failed(String),
}

impl SessionState {
    /// The session, when authenticated.
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    /// Whether no further transition will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Authenticated(_) | SessionState::Failed(_))
    }

    /// User-visible status line for the state, if any.
    pub fn status_message(&self) -> Option<&'static str> {
        match self {
            SessionState::Failed(_) => Some(AUTH_FAILED_STATUS),
            _ => None,
        }
    }
}

/// Source of anonymous identities
///
/// Implementations talk to whatever issues identities. Each method is called
/// at most once per process by [`SessionManager`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Issue a fresh anonymous identity.
    async fn create_anonymous_identity(&self) -> Result<Identity>;

    /// Sign in with a pre-issued token instead of anonymously.
    async fn sign_in_with_custom_token(&self, token: &str) -> Result<Identity>;
}

/// Owns the process-wide session value
pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    initial_token: Option<String>,
    state: Observable<SessionState>,
    acquire_lock: Mutex<()>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state.get())
            .field("has_initial_token", &self.initial_token.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager that signs in anonymously.
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            initial_token: None,
            state: Observable::new(SessionState::Unauthenticated),
            acquire_lock: Mutex::new(()),
        }
    }

    /// Sign in with `token` instead of anonymously, when one is given.
    pub fn with_initial_token(mut self, token: Option<String>) -> Self {
        self.initial_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Establish the session, or return the one already established.
    ///
    /// The provider is contacted at most once per manager. Concurrent callers
    /// wait for the single in-flight attempt. After a failure every call
    /// returns [`EchoesError::Auth`] without retrying.
    ///
    /// # Errors
    ///
    /// Returns [`EchoesError::Auth`] if the provider fails.
    pub async fn acquire_session(&self) -> Result<Session> {
        let _guard = self.acquire_lock.lock().await;

        match self.state.get() {
            SessionState::Authenticated(session) => return Ok(session),
            SessionState::Failed(message) => return Err(EchoesError::Auth(message).into()),
            SessionState::Unauthenticated | SessionState::Authenticating => {}
        }

        self.state.set(SessionState::Authenticating);
        tracing::info!("Requesting anonymous identity");

        let attempt = match &self.initial_token {
            Some(token) => self.provider.sign_in_with_custom_token(token).await,
            None => self.provider.create_anonymous_identity().await,
        };

        match attempt {
            Ok(identity) => {
                let session = Session::new(identity);
                tracing::info!(uid = %session.uid(), "Session established");
                self.state.set(SessionState::Authenticated(session.clone()));
                Ok(session)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(error = %message, "Auth error");
                self.state.set(SessionState::Failed(message.clone()));
                Err(EchoesError::Auth(message).into())
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// The session, when present.
    pub fn current(&self) -> Option<Session> {
        self.state.get().session().cloned()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Tear the session value down; observers see the channel close.
    pub fn close(&self) {
        self.state.close();
    }
}
