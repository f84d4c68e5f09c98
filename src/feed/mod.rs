//! Live feed synchronization
//!
//! [`FeedSynchronizer`] keeps a recency-ordered view of the shared posts
//! collection and performs the two writes a client can make: appending a
//! post and liking one.
//!
//! Every snapshot is the full collection re-sorted by `createdAt`
//! descending; nothing is diffed. Likes go through the store's atomic
//! increment and are never applied locally first, so what a viewer sees is
//! always confirmed store state.
//!
//! Store failures stop at this boundary. They are logged and turned into a
//! status line ([`FeedSynchronizer::status`]); callers of the write
//! operations also get the typed error back.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::watch;

use crate::error::{
    EchoesError, Result, LIKE_FAILED_STATUS, LOAD_FAILED_STATUS, POST_FAILED_STATUS,
};
use crate::models::{random_color, sort_newest_first, validate_text, Category, NewPost, Post, PostId};
use crate::session::Session;
use crate::state::Observable;
use crate::store::{CollectionRef, CollectionSubscription, CounterField, PostStore};

pub(crate) mod metrics;

/// Full, recency-ordered materialization of the collection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedSnapshot {
    posts: Vec<Post>,
}

impl FeedSnapshot {
    /// Build a snapshot from store documents in any order.
    pub fn from_documents(mut posts: Vec<Post>) -> Self {
        sort_newest_first(&mut posts);
        Self { posts }
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn into_posts(self) -> Vec<Post> {
        self.posts
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn get(&self, id: &PostId) -> Option<&Post> {
        self.posts.iter().find(|p| &p.id == id)
    }
}

/// Connection state of the feed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FeedStatus {
    /// No subscription has been opened
    #[default]
    Idle,
    /// Subscription requested, no snapshot yet
    Loading,
    /// Snapshots are arriving
    Live,
    /// The subscription failed or was lost
    Unavailable(String),
}

/// Reactive read model published by the synchronizer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedState {
    pub snapshot: FeedSnapshot,
    pub status: FeedStatus,
}

/// Keeps the local feed in step with the shared collection
pub struct FeedSynchronizer {
    store: Arc<dyn PostStore>,
    collection: CollectionRef,
    state: Arc<Observable<FeedState>>,
    status: Arc<Observable<Option<String>>>,
}

impl std::fmt::Debug for FeedSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSynchronizer")
            .field("collection", &self.collection)
            .field("status", &self.state.get().status)
            .finish_non_exhaustive()
    }
}

impl FeedSynchronizer {
    pub fn new(store: Arc<dyn PostStore>, collection: CollectionRef) -> Self {
        Self {
            store,
            collection,
            state: Arc::new(Observable::new(FeedState::default())),
            status: Arc::new(Observable::new(None)),
        }
    }

    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    /// Open the standing subscription to the collection.
    ///
    /// Requires a session. The returned stream yields a full
    /// [`FeedSnapshot`] per change and never ends by itself; cancel or drop
    /// it to release the store-side subscription. If the subscription fails
    /// later, the stream goes quiet and the status turns to
    /// [`LOAD_FAILED_STATUS`] until a fresh subscription delivers.
    ///
    /// # Errors
    ///
    /// Returns [`EchoesError::RemoteRead`] if the store refuses the
    /// subscription.
    pub async fn subscribe(&self, session: &Session) -> Result<FeedSubscription> {
        tracing::info!(collection = %self.collection, uid = %session.uid(), "Opening feed subscription");
        self.state.update(|s| {
            s.status = FeedStatus::Loading;
            true
        });

        match self.store.subscribe(&self.collection).await {
            Ok(inner) => Ok(FeedSubscription {
                inner,
                state: Arc::clone(&self.state),
                status: Arc::clone(&self.status),
                failed: false,
            }),
            Err(e) => {
                tracing::error!(error = %e, "Fetch error");
                mark_unavailable(&self.state, &self.status, e.to_string());
                Err(as_typed(e, EchoesError::RemoteRead))
            }
        }
    }

    /// Append a post authored by `session`.
    ///
    /// The text is trimmed and must be 1-280 code points. The stored post
    /// starts with zero likes, a store-assigned timestamp and a random
    /// palette color. Failures are not retried.
    ///
    /// # Errors
    ///
    /// Returns [`EchoesError::Validation`] without contacting the store when
    /// the text is out of bounds, and [`EchoesError::RemoteWrite`] when the
    /// store rejects the append.
    pub async fn create_post(
        &self,
        session: &Session,
        text: &str,
        category: Category,
    ) -> Result<PostId> {
        let text = validate_text(text)?;
        let fields = NewPost {
            text,
            category,
            color: random_color().to_string(),
            author_id: session.uid().to_string(),
        };

        match self.store.append(&self.collection, fields).await {
            Ok(id) => {
                tracing::info!(post_id = %id, category = %category, "Post created");
                metrics::record_post_created();
                self.clear_status(POST_FAILED_STATUS);
                Ok(id)
            }
            Err(e) => {
                tracing::error!(error = %e, "Error adding post");
                metrics::record_write_failure("append");
                self.status.set(Some(POST_FAILED_STATUS.to_string()));
                Err(as_typed(e, EchoesError::RemoteWrite))
            }
        }
    }

    /// Add one like to `post_id` through the store's atomic increment.
    ///
    /// Nothing is changed locally; the new count arrives with the next
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EchoesError::RemoteWrite`] if the increment is rejected or
    /// the post does not exist. The failure is also reported on the status
    /// line and is not retried.
    pub async fn like_post(&self, session: &Session, post_id: &PostId) -> Result<()> {
        let document = self.collection.doc(post_id);

        match self
            .store
            .increment_field(&document, CounterField::Likes, 1)
            .await
        {
            Ok(()) => {
                tracing::debug!(post_id = %post_id, uid = %session.uid(), "Like recorded");
                metrics::record_like();
                self.clear_status(LIKE_FAILED_STATUS);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(post_id = %post_id, error = %e, "Like error");
                metrics::record_write_failure("increment");
                self.status.set(Some(LIKE_FAILED_STATUS.to_string()));
                Err(as_typed(e, EchoesError::RemoteWrite))
            }
        }
    }

    /// Latest read model.
    pub fn state(&self) -> FeedState {
        self.state.get()
    }

    /// Observe the read model.
    pub fn watch_state(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Current status line, if any.
    pub fn status(&self) -> Option<String> {
        self.status.get()
    }

    /// Observe the status line.
    pub fn watch_status(&self) -> watch::Receiver<Option<String>> {
        self.status.subscribe()
    }

    /// Put `message` on the status line.
    pub fn report_status(&self, message: impl Into<String>) {
        self.status.set(Some(message.into()));
    }

    /// Tear the reactive values down.
    pub fn close(&self) {
        self.state.close();
        self.status.close();
    }

    fn clear_status(&self, message: &str) {
        self.status.update(|current| {
            if current.as_deref() == Some(message) {
                *current = None;
                true
            } else {
                false
            }
        });
    }
}

/// Keep a typed taxonomy error as-is; wrap anything else in `wrap`.
fn as_typed(err: anyhow::Error, wrap: fn(String) -> EchoesError) -> anyhow::Error {
    match err.downcast_ref::<EchoesError>() {
        Some(EchoesError::RemoteRead(_)) | Some(EchoesError::RemoteWrite(_)) => err,
        _ => wrap(err.to_string()).into(),
    }
}

fn mark_unavailable(
    state: &Observable<FeedState>,
    status: &Observable<Option<String>>,
    reason: String,
) {
    state.update(|s| {
        s.status = FeedStatus::Unavailable(reason);
        true
    });
    status.set(Some(LOAD_FAILED_STATUS.to_string()));
}

/// Live stream of feed snapshots
///
/// Each item is the whole feed, newest first. The stream ends only after
/// [`FeedSubscription::cancel`]; dropping it cancels as well.
pub struct FeedSubscription {
    inner: CollectionSubscription,
    state: Arc<Observable<FeedState>>,
    status: Arc<Observable<Option<String>>>,
    failed: bool,
}

impl std::fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("failed", &self.failed)
            .field("cancelled", &self.inner.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl FeedSubscription {
    /// Stop receiving snapshots and release the store subscription.
    pub fn cancel(&mut self) {
        self.inner.cancel();
        self.state.update(|s| {
            if s.status == FeedStatus::Live || s.status == FeedStatus::Loading {
                s.status = FeedStatus::Idle;
                true
            } else {
                false
            }
        });
    }

    /// Cancel and wait until the store has released the subscription.
    pub async fn shutdown(mut self) {
        self.cancel();
        let FeedSubscription { inner, .. } = self;
        inner.shutdown().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Whether the subscription has failed and will deliver nothing more.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    fn publish(&self, snapshot: &FeedSnapshot) {
        let snapshot = snapshot.clone();
        self.state.update(|s| {
            s.snapshot = snapshot;
            s.status = FeedStatus::Live;
            true
        });
        self.status.update(|current| {
            if current.as_deref() == Some(LOAD_FAILED_STATUS) {
                *current = None;
                true
            } else {
                false
            }
        });
    }

    fn fail(&mut self, reason: String) {
        if !self.failed {
            tracing::error!(error = %reason, "Fetch error");
            self.failed = true;
            mark_unavailable(&self.state, &self.status, reason);
        }
    }
}

impl Stream for FeedSubscription {
    type Item = FeedSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if this.inner.is_cancelled() {
                return Poll::Ready(None);
            }
            if this.failed {
                return Poll::Pending;
            }
            match this.inner.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(documents))) => {
                    let snapshot = FeedSnapshot::from_documents(documents);
                    tracing::debug!(posts = snapshot.len(), "Feed snapshot");
                    metrics::record_snapshot(snapshot.len());
                    this.publish(&snapshot);
                    return Poll::Ready(Some(snapshot));
                }
                Poll::Ready(Some(Err(e))) => this.fail(e.to_string()),
                Poll::Ready(None) => this.fail("subscription closed".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Identity;
    use crate::store::{InMemoryPostStore, MockPostStore};
    use std::time::Duration;

    fn session(uid: &str) -> Session {
        Session::new(Identity {
            uid: uid.to_string(),
            is_anonymous: true,
        })
    }

    fn synchronizer(store: &InMemoryPostStore) -> FeedSynchronizer {
        FeedSynchronizer::new(Arc::new(store.clone()), CollectionRef::posts_for_app("test"))
    }

    async fn next(sub: &mut FeedSubscription) -> FeedSnapshot {
        tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("timed out")
            .expect("stream ended")
    }

    async fn next_matching(
        sub: &mut FeedSubscription,
        pred: impl Fn(&FeedSnapshot) -> bool,
    ) -> FeedSnapshot {
        loop {
            let snapshot = next(sub).await;
            if pred(&snapshot) {
                return snapshot;
            }
        }
    }

    #[tokio::test]
    async fn test_created_post_appears_with_zero_likes() {
        let store = InMemoryPostStore::new();
        let feed = synchronizer(&store);
        let me = session("u1");
        let mut sub = feed.subscribe(&me).await.unwrap();
        assert!(next(&mut sub).await.is_empty());

        let id = feed
            .create_post(&me, "hello", Category::Thought)
            .await
            .unwrap();

        let snapshot = next_matching(&mut sub, |s| s.get(&id).is_some()).await;
        let post = snapshot.get(&id).unwrap();
        assert_eq!(post.text, "hello");
        assert_eq!(post.category, Category::Thought);
        assert_eq!(post.likes, 0);
        assert_eq!(post.author_id, "u1");
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_create_post_stores_trimmed_text() {
        let store = InMemoryPostStore::new();
        let feed = synchronizer(&store);
        feed.create_post(&session("u"), "  spaced out \n", Category::Vent)
            .await
            .unwrap();
        assert_eq!(store.snapshot(feed.collection())[0].text, "spaced out");
    }

    #[tokio::test]
    async fn test_invalid_text_never_reaches_store() {
        let mut store = MockPostStore::new();
        store.expect_append().never();
        let feed = FeedSynchronizer::new(Arc::new(store), CollectionRef::new("c"));
        let me = session("u");

        for text in ["", "   ", &"x".repeat(281)] {
            let err = feed
                .create_post(&me, text, Category::Story)
                .await
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<EchoesError>(),
                Some(EchoesError::Validation(_))
            ));
        }
        assert_eq!(feed.status(), None);
    }

    #[tokio::test]
    async fn test_like_uses_atomic_increment_only() {
        let mut store = MockPostStore::new();
        store
            .expect_increment_field()
            .withf(|doc, field, delta| {
                doc.id.as_str() == "p1" && *field == CounterField::Likes && *delta == 1
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        store.expect_subscribe().never();
        let feed = FeedSynchronizer::new(Arc::new(store), CollectionRef::new("c"));

        feed.like_post(&session("u"), &PostId::new("p1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_likes_are_all_counted() {
        let store = InMemoryPostStore::new();
        let feed = Arc::new(synchronizer(&store));
        let id = feed
            .create_post(&session("author"), "like me", Category::Confession)
            .await
            .unwrap();

        let handles: Vec<_> = (0..25)
            .map(|i| {
                let feed = Arc::clone(&feed);
                let id = id.clone();
                tokio::spawn(async move { feed.like_post(&session(&format!("s{}", i)), &id).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.snapshot(feed.collection())[0].likes, 25);
    }

    #[tokio::test]
    async fn test_write_failure_sets_status_and_clears_on_success() {
        let store = InMemoryPostStore::new();
        let feed = synchronizer(&store);
        let me = session("u");

        store.set_fail_writes(true);
        let err = feed
            .create_post(&me, "doomed", Category::Thought)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EchoesError>(),
            Some(EchoesError::RemoteWrite(_))
        ));
        assert_eq!(feed.status().as_deref(), Some(POST_FAILED_STATUS));
        assert!(store.snapshot(feed.collection()).is_empty());

        store.set_fail_writes(false);
        feed.create_post(&me, "works", Category::Thought)
            .await
            .unwrap();
        assert_eq!(feed.status(), None);
    }

    #[tokio::test]
    async fn test_like_missing_post_is_soft_failure() {
        let store = InMemoryPostStore::new();
        let feed = synchronizer(&store);
        let err = feed
            .like_post(&session("u"), &PostId::new("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EchoesError>(),
            Some(EchoesError::RemoteWrite(_))
        ));
        assert_eq!(feed.status().as_deref(), Some(LIKE_FAILED_STATUS));
    }

    #[tokio::test]
    async fn test_subscribe_refused_marks_unavailable() {
        let store = InMemoryPostStore::new();
        store.set_fail_reads(true);
        let feed = synchronizer(&store);

        let err = feed.subscribe(&session("u")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EchoesError>(),
            Some(EchoesError::RemoteRead(_))
        ));
        assert!(matches!(feed.state().status, FeedStatus::Unavailable(_)));
        assert_eq!(feed.status().as_deref(), Some(LOAD_FAILED_STATUS));
    }

    #[tokio::test]
    async fn test_lost_connection_goes_quiet_until_resubscribe() {
        let store = InMemoryPostStore::new();
        let feed = synchronizer(&store);
        let me = session("u");
        let mut sub = feed.subscribe(&me).await.unwrap();
        next(&mut sub).await;
        assert_eq!(feed.state().status, FeedStatus::Live);

        store.disconnect_subscribers();
        let quiet = tokio::time::timeout(Duration::from_millis(100), sub.next()).await;
        assert!(quiet.is_err(), "failed subscription must not end or deliver");
        assert!(sub.has_failed());
        {
            let mut polled = tokio_test::task::spawn(sub.next());
            tokio_test::assert_pending!(polled.poll());
        }
        assert_eq!(feed.status().as_deref(), Some(LOAD_FAILED_STATUS));

        let mut fresh = feed.subscribe(&me).await.unwrap();
        next(&mut fresh).await;
        assert_eq!(feed.state().status, FeedStatus::Live);
        assert_eq!(feed.status(), None);
    }

    #[tokio::test]
    async fn test_cancelled_subscription_delivers_nothing_more() {
        let store = InMemoryPostStore::new();
        let feed = synchronizer(&store);
        let me = session("u");
        let mut sub = feed.subscribe(&me).await.unwrap();
        next(&mut sub).await;

        sub.cancel();
        feed.create_post(&me, "after cancel", Category::Story)
            .await
            .unwrap();

        assert!(sub.next().await.is_none());
        sub.shutdown().await;
        assert_eq!(store.active_subscriptions(), 0);
        assert_eq!(feed.state().status, FeedStatus::Idle);
    }

    #[tokio::test]
    async fn test_read_model_tracks_snapshots() {
        let store = InMemoryPostStore::new();
        let feed = synchronizer(&store);
        let me = session("u");
        let mut rx = feed.watch_state();
        let mut sub = feed.subscribe(&me).await.unwrap();
        next(&mut sub).await;

        feed.create_post(&me, "one", Category::Thought).await.unwrap();
        next_matching(&mut sub, |s| s.len() == 1).await;

        let state = rx
            .wait_for(|s| s.snapshot.len() == 1)
            .await
            .unwrap()
            .clone();
        assert_eq!(state.status, FeedStatus::Live);
        assert_eq!(state.snapshot.posts()[0].text, "one");
    }

    #[test]
    fn test_snapshot_sorting_is_stable_under_reapplication() {
        use chrono::{TimeZone, Utc};
        let posts: Vec<Post> = [3, 1, 2]
            .iter()
            .map(|n| Post {
                id: PostId::new(format!("p{}", n)),
                text: String::new(),
                category: Category::Thought,
                likes: 0,
                created_at: Some(Utc.timestamp_opt(*n, 0).unwrap()),
                color: None,
                author_id: "a".to_string(),
            })
            .collect();

        let once = FeedSnapshot::from_documents(posts);
        let twice = FeedSnapshot::from_documents(once.clone().into_posts());
        assert_eq!(once, twice);
        assert_eq!(once.posts()[0].id.as_str(), "p3");
    }
}
