//! Echoes - anonymous micro-posting board library
//!
//! This library provides a client for a shared, live feed of short anonymous
//! posts: anonymous sessions, a real-time recency-ordered feed, post creation
//! and atomic likes over a pluggable document store.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: Identity provider abstraction and the session manager
//! - `store`: Document store abstraction and implementations (memory, SQLite)
//! - `feed`: Feed synchronizer, snapshots and the feed read model
//! - `client`: Facade combining session and feed for front-ends
//! - `models`: Post data model and text validation
//! - `state`: Observable state holders
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface and handlers
//!
//! # Example
//!
//! ```no_run
//! use echoes::{Category, Config, EchoesClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let client = EchoesClient::from_config(&config)?;
//!     client.start().await?;
//!     client.submit_post("hello", Category::Thought).await?;
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod feed;
pub mod logging;
pub mod models;
pub mod session;
pub mod state;
pub mod store;

// Re-export commonly used types
pub use client::EchoesClient;
pub use config::Config;
pub use error::{EchoesError, Result};
pub use feed::{FeedSnapshot, FeedState, FeedStatus, FeedSubscription, FeedSynchronizer};
pub use models::{Category, Post, PostId};
pub use session::{Session, SessionManager};
pub use store::{CollectionRef, InMemoryPostStore, PostStore, SqlitePostStore};
