//! SQLite-backed post store
//!
//! Documents live in a single `posts` table keyed by id and partitioned by
//! collection path. SQLite assigns `created_at` inside the INSERT and the
//! like counter is bumped with a single `UPDATE ... SET likes = likes + ?`,
//! so neither timestamps nor counters depend on the client.
//!
//! Subscriptions wake on writes made through this process and on a poll
//! interval, which is how commits from other processes become visible. A
//! snapshot is only delivered when it differs from the previous delivery.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::error::{EchoesError, Result};
use crate::models::{Category, NewPost, Post, PostId};
use crate::store::{
    ActiveCounter, CollectionRef, CollectionSubscription, CounterField, DocumentRef, PostStore,
};

/// Default interval between polls for commits made by other processes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite implementation of [`PostStore`]
#[derive(Debug, Clone)]
pub struct SqlitePostStore {
    db_path: PathBuf,
    poll_interval: Duration,
    version: Arc<watch::Sender<u64>>,
    active: ActiveCounter,
}

impl SqlitePostStore {
    /// Create a new storage instance
    ///
    /// Uses `ECHOES_DB` when set, otherwise `echoes.db` in the user's data
    /// directory.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("ECHOES_DB") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("com", "echoes", "echoes")
            .ok_or_else(|| EchoesError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("Failed to create data directory")
            .map_err(|e| EchoesError::Storage(e.to_string()))?;

        Self::new_with_path(data_dir.join("echoes.db"))
    }

    /// Create a new storage instance that uses the specified database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use echoes::store::SqlitePostStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = SqlitePostStore::new_with_path(dir.path().join("echoes.db")).unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create parent directory for database")
                    .map_err(|e| EchoesError::Storage(e.to_string()))?;
            }
        }

        let (version, _) = watch::channel(0);
        let store = Self {
            db_path,
            poll_interval: DEFAULT_POLL_INTERVAL,
            version: Arc::new(version),
            active: ActiveCounter::new(),
        };
        store.init()?;
        Ok(store)
    }

    /// Change how often subscriptions poll for foreign commits.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| EchoesError::Storage(e.to_string()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| EchoesError::Storage(e.to_string()))?;
        Ok(conn)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.open()?;

        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .context("Failed to enable WAL")
            .map_err(|e| EchoesError::Storage(e.to_string()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                text TEXT NOT NULL,
                category TEXT NOT NULL,
                likes INTEGER NOT NULL DEFAULT 0 CHECK (likes >= 0),
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                color TEXT,
                author_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_posts_collection_created
                ON posts (collection, created_at DESC);",
        )
        .context("Failed to create tables")
        .map_err(|e| EchoesError::Storage(e.to_string()))?;

        Ok(())
    }

    fn insert_post(&self, collection: &CollectionRef, fields: &NewPost) -> Result<PostId> {
        let conn = self.open().map_err(write_error)?;
        let id = Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO posts (id, collection, text, category, likes, color, author_id)
            VALUES (?, ?, ?, ?, 0, ?, ?)",
            params![
                id,
                collection.path(),
                fields.text,
                fields.category.as_str(),
                fields.color,
                fields.author_id
            ],
        )
        .context("Failed to insert post")
        .map_err(write_error)?;

        Ok(PostId::new(id))
    }

    fn increment(&self, document: &DocumentRef, field: CounterField, delta: u64) -> Result<()> {
        let delta = i64::try_from(delta)
            .map_err(|_| EchoesError::Validation(format!("Increment too large: {}", delta)))?;
        let conn = self.open().map_err(write_error)?;

        let sql = match field {
            CounterField::Likes => {
                "UPDATE posts SET likes = likes + ? WHERE id = ? AND collection = ?"
            }
        };
        let changed = conn
            .execute(
                sql,
                params![delta, document.id.as_str(), document.collection.path()],
            )
            .context("Failed to increment field")
            .map_err(write_error)?;

        if changed == 0 {
            return Err(EchoesError::NotFound(document.to_string()).into());
        }
        Ok(())
    }

    /// Read the whole collection, newest first.
    pub fn load_snapshot(&self, collection: &CollectionRef) -> Result<Vec<Post>> {
        let conn = self.open().map_err(read_error)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, text, category, likes, created_at, color, author_id
                FROM posts
                WHERE collection = ?
                ORDER BY created_at DESC",
            )
            .context("Failed to prepare statement")
            .map_err(read_error)?;

        let rows = stmt
            .query_map(params![collection.path()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context("Failed to query posts")
            .map_err(read_error)?;

        let mut posts = Vec::new();
        for row in rows {
            let (id, text, category, likes, created_at, color, author_id) = match row {
                Ok(fields) => fields,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable post row");
                    continue;
                }
            };
            let category = match category.parse::<Category>() {
                Ok(category) => category,
                Err(_) => {
                    tracing::warn!(post_id = %id, category = %category, "Skipping post with unknown category");
                    continue;
                }
            };
            let created_at = created_at.and_then(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            });
            posts.push(Post {
                id: PostId::new(id),
                text,
                category,
                likes: u64::try_from(likes).unwrap_or(0),
                created_at,
                color,
                author_id,
            });
        }

        Ok(posts)
    }

    fn notify_local_write(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

fn write_error(e: impl std::fmt::Display) -> EchoesError {
    EchoesError::RemoteWrite(e.to_string())
}

fn read_error(e: impl std::fmt::Display) -> EchoesError {
    EchoesError::RemoteRead(e.to_string())
}

/// Run a blocking database call off the async executor.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EchoesError::Storage(format!("Database task failed: {}", e)))?
}

#[async_trait]
impl PostStore for SqlitePostStore {
    async fn append(&self, collection: &CollectionRef, fields: NewPost) -> Result<PostId> {
        let store = self.clone();
        let target = collection.clone();
        let id = blocking(move || store.insert_post(&target, &fields)).await?;
        self.notify_local_write();

        tracing::debug!(collection = %collection, post_id = %id, "Appended post");
        Ok(id)
    }

    async fn increment_field(
        &self,
        document: &DocumentRef,
        field: CounterField,
        delta: u64,
    ) -> Result<()> {
        let store = self.clone();
        let target = document.clone();
        blocking(move || store.increment(&target, field, delta)).await?;
        self.notify_local_write();

        tracing::debug!(document = %document, field = field.as_str(), delta, "Incremented field");
        Ok(())
    }

    async fn subscribe(&self, collection: &CollectionRef) -> Result<CollectionSubscription> {
        let store = self.clone();
        let target = collection.clone();
        let initial = blocking(move || store.load_snapshot(&target)).await?;

        let store = self.clone();
        let collection = collection.clone();
        let guard = self.active.acquire();
        let mut version_rx = self.version.subscribe();
        version_rx.borrow_and_update();
        let poll_interval = self.poll_interval;

        Ok(CollectionSubscription::spawn(move |sender| async move {
            let _guard = guard;
            let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut last = initial.clone();
            if !sender.deliver(Ok(initial)).await {
                return;
            }

            loop {
                tokio::select! {
                    biased;
                    _ = sender.cancelled() => break,
                    changed = version_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {}
                }
                version_rx.borrow_and_update();

                let reader = store.clone();
                let target = collection.clone();
                match blocking(move || reader.load_snapshot(&target)).await {
                    Ok(posts) if posts == last => {}
                    Ok(posts) => {
                        last = posts.clone();
                        if !sender.deliver(Ok(posts)).await {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(collection = %collection, error = %e, "Snapshot read failed");
                        sender.deliver(Err(e)).await;
                        break;
                    }
                }
            }
            tracing::debug!(collection = %collection, "Subscription producer stopped");
        }))
    }

    fn active_subscriptions(&self) -> usize {
        self.active.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serial_test::serial;
    use std::env;
    use tempfile::tempdir;

    fn create_test_store() -> (SqlitePostStore, tempfile::TempDir) {
        let dir = tempdir().expect("failed to create tempdir");
        let store = SqlitePostStore::new_with_path(dir.path().join("echoes.db"))
            .expect("failed to create store")
            .with_poll_interval(Duration::from_millis(20));
        (store, dir)
    }

    fn new_post(text: &str, category: Category) -> NewPost {
        NewPost {
            text: text.to_string(),
            category,
            color: "from-cyan-500 to-blue-500".to_string(),
            author_id: "author-1".to_string(),
        }
    }

    #[test]
    fn test_init_creates_table() {
        let (store, _dir) = create_test_store();
        let conn = Connection::open(store.db_path()).expect("open connection");
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='posts'",
                [],
                |r| r.get(0),
            )
            .expect("query row");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_append_round_trips_fields() {
        let (store, _dir) = create_test_store();
        let collection = CollectionRef::new("c");

        let id = store
            .append(&collection, new_post("hello", Category::Thought))
            .await
            .unwrap();
        let posts = store.load_snapshot(&collection).unwrap();

        assert_eq!(posts.len(), 1);
        let post = &posts[0];
        assert_eq!(post.id, id);
        assert_eq!(post.text, "hello");
        assert_eq!(post.category, Category::Thought);
        assert_eq!(post.likes, 0);
        assert_eq!(post.color.as_deref(), Some("from-cyan-500 to-blue-500"));
        assert_eq!(post.author_id, "author-1");
        assert!(post.created_at.is_some());
    }

    #[tokio::test]
    async fn test_created_at_is_assigned_by_database() {
        let (store, _dir) = create_test_store();
        let collection = CollectionRef::new("c");
        let before = Utc::now() - chrono::Duration::seconds(5);

        store
            .append(&collection, new_post("x", Category::Vent))
            .await
            .unwrap();

        let created = store.load_snapshot(&collection).unwrap()[0]
            .created_at
            .expect("stamped");
        assert!(created >= before);
    }

    #[tokio::test]
    async fn test_increment_missing_post_is_not_found() {
        let (store, _dir) = create_test_store();
        let doc = CollectionRef::new("c").doc(&PostId::new("nope"));
        let err = store
            .increment_field(&doc, CounterField::Likes, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EchoesError>(),
            Some(EchoesError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_from_separate_connections() {
        let (store, _dir) = create_test_store();
        let collection = CollectionRef::new("c");
        let id = store
            .append(&collection, new_post("popular", Category::Story))
            .await
            .unwrap();

        // Separate store handles share nothing but the file.
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let other = SqlitePostStore::new_with_path(store.db_path()).unwrap();
                let doc = collection.doc(&id);
                tokio::spawn(async move { other.increment_field(&doc, CounterField::Likes, 1).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.load_snapshot(&collection).unwrap()[0].likes, 20);
    }

    #[tokio::test]
    async fn test_unknown_category_rows_are_skipped() {
        let (store, _dir) = create_test_store();
        let collection = CollectionRef::new("c");
        store
            .append(&collection, new_post("good", Category::Thought))
            .await
            .unwrap();

        let conn = Connection::open(store.db_path()).unwrap();
        conn.execute(
            "INSERT INTO posts (id, collection, text, category, author_id) VALUES ('bad', 'c', 't', 'Rant', 'a')",
            [],
        )
        .unwrap();

        let posts = store.load_snapshot(&collection).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].text, "good");
    }

    #[tokio::test]
    async fn test_undecodable_rows_are_skipped() {
        let (store, _dir) = create_test_store();
        let collection = CollectionRef::new("c");
        store
            .append(&collection, new_post("good", Category::Thought))
            .await
            .unwrap();

        let conn = Connection::open(store.db_path()).unwrap();
        conn.execute(
            "INSERT INTO posts (id, collection, text, category, likes, author_id) VALUES ('bad', 'c', 't', 'Thought', 'lots', 'a')",
            [],
        )
        .unwrap();

        let posts = store.load_snapshot(&collection).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].text, "good");
    }

    #[tokio::test]
    async fn test_subscription_sees_local_writes() {
        let (store, _dir) = create_test_store();
        let collection = CollectionRef::new("c");
        let mut sub = store.subscribe(&collection).await.unwrap();

        let first = sub.next().await.unwrap().unwrap();
        assert!(first.is_empty());

        store
            .append(&collection, new_post("new", Category::Confession))
            .await
            .unwrap();

        let next = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].text, "new");
    }

    #[tokio::test]
    async fn test_subscription_polls_foreign_writes() {
        let (store, _dir) = create_test_store();
        let collection = CollectionRef::new("c");
        let mut sub = store.subscribe(&collection).await.unwrap();
        sub.next().await.unwrap().unwrap();

        // A second handle has its own wake channel, like another process.
        let foreign = SqlitePostStore::new_with_path(store.db_path()).unwrap();
        foreign
            .append(&collection, new_post("from elsewhere", Category::Thought))
            .await
            .unwrap();

        let next = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .unwrap();
        assert_eq!(next[0].text, "from elsewhere");
    }

    #[tokio::test]
    async fn test_shutdown_releases_producer() {
        let (store, _dir) = create_test_store();
        let sub = store.subscribe(&CollectionRef::new("c")).await.unwrap();
        assert_eq!(store.active_subscriptions(), 1);
        sub.shutdown().await;
        assert_eq!(store.active_subscriptions(), 0);
    }

    #[test]
    #[serial]
    fn test_new_respects_env_override() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let db_path = dir.path().join("nested").join("echoes.db");
        env::set_var("ECHOES_DB", db_path.to_string_lossy().to_string());

        let store = SqlitePostStore::new().expect("new failed with env override");
        assert_eq!(store.db_path(), db_path.as_path());
        assert!(db_path.parent().unwrap().exists());

        env::remove_var("ECHOES_DB");
    }
}
