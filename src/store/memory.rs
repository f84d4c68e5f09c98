//! In-memory post store
//!
//! All clones of an [`InMemoryPostStore`] share the same documents, so
//! several clients in one process see each other's writes exactly as they
//! would through a shared remote database.
//!
//! Every mutation happens under one mutex, which is what makes the counter
//! increment atomic. Subscribers are woken through a `watch` version counter;
//! intermediate versions may be coalesced since each delivery is a full
//! snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{EchoesError, Result};
use crate::models::{sort_newest_first, NewPost, Post, PostId};
use crate::store::{
    ActiveCounter, CollectionRef, CollectionSubscription, CounterField, DocumentRef, PostStore,
};

#[derive(Debug, Default)]
struct Documents {
    collections: HashMap<CollectionRef, Vec<Post>>,
    last_stamp: Option<DateTime<Utc>>,
}

impl Documents {
    /// Wall-clock time, nudged forward so stamps strictly increase.
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + ChronoDuration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }
}

#[derive(Debug)]
struct Shared {
    documents: Mutex<Documents>,
    version: watch::Sender<u64>,
    disconnects: watch::Sender<u64>,
    active: ActiveCounter,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

/// Process-local [`PostStore`]
#[derive(Debug, Clone)]
pub struct InMemoryPostStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryPostStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPostStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        let (disconnects, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                documents: Mutex::new(Documents::default()),
                version,
                disconnects,
                active: ActiveCounter::new(),
                fail_writes: AtomicBool::new(false),
                fail_reads: AtomicBool::new(false),
            }),
        }
    }

    /// Reject every subsequent append and increment.
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Reject every subsequent subscribe.
    pub fn set_fail_reads(&self, fail: bool) {
        self.shared.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Drop every live subscription with a read error, as a lost connection
    /// would.
    pub fn disconnect_subscribers(&self) {
        self.shared.disconnects.send_modify(|v| *v += 1);
    }

    /// Current contents of `collection`, newest first.
    pub fn snapshot(&self, collection: &CollectionRef) -> Vec<Post> {
        let docs = self.lock();
        let mut posts = docs
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default();
        sort_newest_first(&mut posts);
        posts
    }

    fn lock(&self) -> MutexGuard<'_, Documents> {
        match self.shared.documents.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(EchoesError::RemoteWrite("write rejected by store".to_string()).into());
        }
        Ok(())
    }

    fn bump_version(&self) {
        self.shared.version.send_modify(|v| *v += 1);
    }
}

#[async_trait]
impl PostStore for InMemoryPostStore {
    async fn append(&self, collection: &CollectionRef, fields: NewPost) -> Result<PostId> {
        self.check_writable()?;

        let id = PostId::new(Uuid::new_v4().to_string());
        {
            let mut docs = self.lock();
            let created_at = docs.next_stamp();
            docs.collections
                .entry(collection.clone())
                .or_default()
                .push(Post {
                    id: id.clone(),
                    text: fields.text,
                    category: fields.category,
                    likes: 0,
                    created_at: Some(created_at),
                    color: Some(fields.color),
                    author_id: fields.author_id,
                });
        }
        self.bump_version();

        tracing::debug!(collection = %collection, post_id = %id, "Appended post");
        Ok(id)
    }

    async fn increment_field(
        &self,
        document: &DocumentRef,
        field: CounterField,
        delta: u64,
    ) -> Result<()> {
        self.check_writable()?;

        {
            let mut docs = self.lock();
            let post = docs
                .collections
                .get_mut(&document.collection)
                .and_then(|posts| posts.iter_mut().find(|p| p.id == document.id))
                .ok_or_else(|| EchoesError::NotFound(document.to_string()))?;
            match field {
                CounterField::Likes => post.likes = post.likes.saturating_add(delta),
            }
        }
        self.bump_version();

        tracing::debug!(document = %document, field = field.as_str(), delta, "Incremented field");
        Ok(())
    }

    async fn subscribe(&self, collection: &CollectionRef) -> Result<CollectionSubscription> {
        if self.shared.fail_reads.load(Ordering::SeqCst) {
            return Err(EchoesError::RemoteRead("permission denied".to_string()).into());
        }

        let store = self.clone();
        let collection = collection.clone();
        let guard = self.shared.active.acquire();
        let mut version_rx = self.shared.version.subscribe();
        let mut disconnect_rx = self.shared.disconnects.subscribe();
        disconnect_rx.borrow_and_update();

        Ok(CollectionSubscription::spawn(move |sender| async move {
            let _guard = guard;
            loop {
                version_rx.borrow_and_update();
                let snapshot = store.snapshot(&collection);
                if !sender.deliver(Ok(snapshot)).await {
                    break;
                }

                tokio::select! {
                    biased;
                    _ = sender.cancelled() => break,
                    _ = disconnect_rx.changed() => {
                        tracing::warn!(collection = %collection, "Subscription connection lost");
                        sender
                            .deliver(Err(EchoesError::RemoteRead("connection lost".to_string()).into()))
                            .await;
                        break;
                    }
                    changed = version_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(collection = %collection, "Subscription producer stopped");
        }))
    }

    fn active_subscriptions(&self) -> usize {
        self.shared.active.get()
    }
}
