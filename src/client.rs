//! Client facade
//!
//! [`EchoesClient`] wires the session manager and the feed synchronizer
//! together the way a front-end uses them: sign in, then keep a live feed
//! pumped into the read model in the background, and expose the two writes
//! plus the small bits of derived state a composer needs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{EchoesError, Result, AUTH_FAILED_STATUS};
use crate::feed::{FeedState, FeedSynchronizer};
use crate::models::{Category, PostId, MAX_TEXT_CHARS};
use crate::session::{
    IdentityProvider, LocalIdentityProvider, Session, SessionManager, SessionState,
};
use crate::store::{create_store, PostStore};

pub const CONNECTED_LABEL: &str = "Connected";
pub const CONNECTING_LABEL: &str = "Connecting...";

/// Session plus live feed for one process
pub struct EchoesClient {
    sessions: Arc<SessionManager>,
    feed: Arc<FeedSynchronizer>,
    store: Arc<dyn PostStore>,
    submitting: Arc<AtomicBool>,
    cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EchoesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoesClient")
            .field("sessions", &self.sessions)
            .field("feed", &self.feed)
            .field("submitting", &self.submitting.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl EchoesClient {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn PostStore>,
        config: &Config,
    ) -> Self {
        let sessions = SessionManager::new(provider)
            .with_initial_token(config.session.initial_auth_token.clone());
        let feed = FeedSynchronizer::new(Arc::clone(&store), config.collection());
        Self {
            sessions: Arc::new(sessions),
            feed: Arc::new(feed),
            store,
            submitting: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            pump: Mutex::new(None),
        }
    }

    /// Build a client with the configured store and the local identity
    /// provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the store backend cannot be opened.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = create_store(&config.store)?;
        Ok(Self::new(
            Arc::new(LocalIdentityProvider::new()),
            store,
            config,
        ))
    }

    /// Acquire the session and start the live feed.
    ///
    /// Calling it again after a successful start returns the same session
    /// and keeps the running feed.
    ///
    /// # Errors
    ///
    /// Returns [`EchoesError::Auth`] if sign-in fails; the feed is then never
    /// started. Returns [`EchoesError::RemoteRead`] if the subscription is
    /// refused.
    pub async fn start(&self) -> Result<Session> {
        let session = match self.sessions.acquire_session().await {
            Ok(session) => session,
            Err(e) => {
                self.feed.report_status(AUTH_FAILED_STATUS);
                return Err(e);
            }
        };

        let mut pump = self.pump.lock().await;
        if pump.is_some() {
            return Ok(session);
        }
        if self.cancel.is_cancelled() {
            return Err(EchoesError::RemoteRead("client is shut down".to_string()).into());
        }

        let mut subscription = self.feed.subscribe(&session).await?;
        let token = self.cancel.child_token();
        *pump = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = subscription.next() => {
                        if next.is_none() {
                            break;
                        }
                    }
                }
            }
            subscription.shutdown().await;
            tracing::debug!("Feed pump stopped");
        }));

        tracing::info!(uid = %session.uid(), "Client started");
        Ok(session)
    }

    /// Stop the live feed and tear down the reactive values.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.pump.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Feed pump ended abnormally: {}", e);
            }
        }
        self.feed.close();
        self.sessions.close();
        tracing::info!("Client shut down");
    }

    /// Post `text` as the current session.
    ///
    /// # Errors
    ///
    /// Returns [`EchoesError::Auth`] without a session,
    /// [`EchoesError::Validation`] for bad text or while another submission
    /// is in flight, and [`EchoesError::RemoteWrite`] if the store rejects it.
    pub async fn submit_post(&self, text: &str, category: Category) -> Result<PostId> {
        let session = self.require_session()?;
        let _in_flight = InFlight::try_begin(&self.submitting).ok_or_else(|| {
            EchoesError::Validation("A post is already being submitted".to_string())
        })?;
        self.feed.create_post(&session, text, category).await
    }

    /// Like `post_id` as the current session.
    ///
    /// # Errors
    ///
    /// Returns [`EchoesError::Auth`] without a session and
    /// [`EchoesError::RemoteWrite`] if the increment fails.
    pub async fn like_post(&self, post_id: &PostId) -> Result<()> {
        let session = self.require_session()?;
        self.feed.like_post(&session, post_id).await
    }

    /// Whether the composer's submit affordance is enabled for `text`.
    ///
    /// Accepts exactly the text [`submit_post`](Self::submit_post) would.
    pub fn can_submit(&self, text: &str) -> bool {
        let trimmed = text.trim();
        self.sessions.current().is_some()
            && !self.submitting.load(Ordering::SeqCst)
            && !trimmed.is_empty()
            && trimmed.chars().count() <= MAX_TEXT_CHARS
    }

    pub fn connection_label(&self) -> &'static str {
        if self.sessions.current().is_some() {
            CONNECTED_LABEL
        } else {
            CONNECTING_LABEL
        }
    }

    /// Observe the session.
    pub fn session(&self) -> watch::Receiver<SessionState> {
        self.sessions.subscribe()
    }

    /// Observe the feed read model.
    pub fn posts(&self) -> watch::Receiver<FeedState> {
        self.feed.watch_state()
    }

    /// Observe the status line.
    pub fn status(&self) -> watch::Receiver<Option<String>> {
        self.feed.watch_status()
    }

    pub fn feed(&self) -> &FeedSynchronizer {
        &self.feed
    }

    pub fn store(&self) -> &Arc<dyn PostStore> {
        &self.store
    }

    fn require_session(&self) -> Result<Session> {
        self.sessions
            .current()
            .ok_or_else(|| EchoesError::Auth("Not signed in".to_string()).into())
    }
}

impl Drop for EchoesClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Marks a submission in flight until dropped
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn try_begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
