//! Document store abstraction and implementations
//!
//! This module defines the [`PostStore`] trait the feed synchronizer talks
//! to. Concrete implementations live in submodules:
//!
//! - [`memory::InMemoryPostStore`] -- process-local store, shared by cloning.
//! - [`sqlite::SqlitePostStore`] -- SQLite-backed store that also picks up
//!   writes from other processes by polling.
//!
//! # Design
//!
//! The trait mirrors what a managed real-time document database offers:
//! append a document (the store assigns id and timestamp), atomically
//! increment a numeric field, and subscribe to a collection. A subscription
//! delivers the full collection on every change, starting with the current
//! contents, until it is cancelled or dropped.
//!
//! Increments must be atomic inside the store. A backend that cannot do that
//! natively does not qualify; callers never read a counter and write it back.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use metrics::{decrement_gauge, increment_gauge};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::StoreConfig;
use crate::error::{EchoesError, Result};
use crate::models::{NewPost, Post, PostId};

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryPostStore;
pub use sqlite::SqlitePostStore;

/// Number of snapshots buffered per subscription before the producer waits
const SUBSCRIPTION_BUFFER: usize = 8;

/// Path of a collection inside the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRef(String);

impl CollectionRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The shared posts collection of an application.
    pub fn posts_for_app(app_id: &str) -> Self {
        Self(format!("artifacts/{}/public/data/thoughts", app_id))
    }

    pub fn path(&self) -> &str {
        &self.0
    }

    /// Reference to one document of this collection.
    pub fn doc(&self, id: &PostId) -> DocumentRef {
        DocumentRef {
            collection: self.clone(),
            id: id.clone(),
        }
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a single document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    pub collection: CollectionRef,
    pub id: PostId,
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Numeric fields that support atomic increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    Likes,
}

impl CounterField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterField::Likes => "likes",
        }
    }
}

/// Abstraction over document stores holding posts.
///
/// Used polymorphically through `Arc<dyn PostStore>`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Append a new post. The store assigns the id, sets `likes` to zero and
    /// stamps `createdAt` itself.
    ///
    /// # Errors
    ///
    /// Returns [`EchoesError::RemoteWrite`] if the write is rejected.
    async fn append(&self, collection: &CollectionRef, fields: NewPost) -> Result<PostId>;

    /// Atomically add `delta` to a counter field of one document.
    ///
    /// # Errors
    ///
    /// Returns [`EchoesError::NotFound`] if the document does not exist and
    /// [`EchoesError::RemoteWrite`] if the write is rejected.
    async fn increment_field(
        &self,
        document: &DocumentRef,
        field: CounterField,
        delta: u64,
    ) -> Result<()>;

    /// Open a subscription delivering full snapshots of `collection`.
    ///
    /// The first snapshot is the current contents.
    ///
    /// # Errors
    ///
    /// Returns [`EchoesError::RemoteRead`] if the collection cannot be read.
    async fn subscribe(&self, collection: &CollectionRef) -> Result<CollectionSubscription>;

    /// Number of subscriptions whose producer is still running.
    fn active_subscriptions(&self) -> usize;
}

/// Create a store from configuration
///
/// # Errors
///
/// Returns [`EchoesError::Config`] for an unknown backend, or the backend's
/// own error if it cannot be opened.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn PostStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryPostStore::new())),
        "sqlite" => {
            let store = match &config.sqlite.path {
                Some(path) => SqlitePostStore::new_with_path(path)?,
                None => SqlitePostStore::new()?,
            };
            Ok(Arc::new(store.with_poll_interval(config.sqlite.poll_interval())))
        }
        other => Err(EchoesError::Config(format!("Unknown store backend: {}", other)).into()),
    }
}

/// Cancellable handle on a collection subscription.
///
/// Yields `Ok(snapshot)` for every change and `Err` once if the
/// subscription fails; after an error the producer has stopped. Dropping the
/// handle cancels the subscription.
pub struct CollectionSubscription {
    rx: mpsc::Receiver<Result<Vec<Post>>>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for CollectionSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionSubscription")
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl CollectionSubscription {
    /// Spawn `producer` with a fresh channel and cancellation token.
    ///
    /// The producer receives a [`SnapshotSender`] and must return when the
    /// token is cancelled or the sender reports the consumer gone.
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(SnapshotSender) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let token = CancellationToken::new();
        let sender = SnapshotSender {
            tx,
            token: token.clone(),
        };
        let task = tokio::spawn(producer(sender));
        Self {
            rx,
            token,
            task: Some(task),
        }
    }

    /// Stop the subscription and release the producer.
    ///
    /// Snapshots already buffered are discarded.
    pub fn cancel(&mut self) {
        if !self.token.is_cancelled() {
            tracing::debug!("Cancelling collection subscription");
        }
        self.token.cancel();
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait until the producer task has exited.
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Subscription producer ended abnormally: {}", e);
            }
        }
    }
}

impl Stream for CollectionSubscription {
    type Item = Result<Vec<Post>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.token.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for CollectionSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Producer side of a [`CollectionSubscription`]
#[derive(Debug, Clone)]
pub struct SnapshotSender {
    tx: mpsc::Sender<Result<Vec<Post>>>,
    token: CancellationToken,
}

impl SnapshotSender {
    /// Deliver one item. Returns `false` once the subscription is over.
    pub async fn deliver(&self, item: Result<Vec<Post>>) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }

    /// Resolves when the subscription is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }
}

/// Counts live subscription producers for a store.
///
/// A [`ActiveGuard`] is held by each producer task; dropping it releases the
/// slot.
#[derive(Debug, Clone, Default)]
pub struct ActiveCounter(Arc<AtomicUsize>);

impl ActiveCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> ActiveGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        increment_gauge!("echoes_active_subscriptions", 1.0);
        ActiveGuard(Arc::clone(&self.0))
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Slot held by a running subscription producer
#[derive(Debug)]
pub struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
        decrement_gauge!("echoes_active_subscriptions", 1.0);
    }
}
