//! Post data model
//!
//! Field names on the serialized form (`text`, `category`, `likes`,
//! `createdAt`, `color`, `authorId`) are the storage contract and must not
//! change when swapping backends.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::error::{EchoesError, Result};

/// Maximum post length, in Unicode code points, after trimming
pub const MAX_TEXT_CHARS: usize = 280;

/// Decorative gradients a post may be tagged with
pub const COLOR_PALETTE: [&str; 5] = [
    "from-pink-500 to-rose-500",
    "from-purple-500 to-indigo-500",
    "from-cyan-500 to-blue-500",
    "from-emerald-500 to-teal-500",
    "from-orange-500 to-red-500",
];

/// Gradient used when a stored post carries no color
pub const FALLBACK_COLOR: &str = "from-purple-500 to-blue-500";

/// Pick a palette entry uniformly at random.
pub fn random_color() -> &'static str {
    COLOR_PALETTE
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(FALLBACK_COLOR)
}

/// Store-assigned identifier of a post
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    /// Wrap an identifier produced by a store.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The fixed set of post categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Category {
    #[default]
    Confession,
    Thought,
    Story,
    Vent,
}

impl Category {
    /// Every category, in the order the composer offers them.
    pub const ALL: [Category; 4] = [
        Category::Confession,
        Category::Thought,
        Category::Story,
        Category::Vent,
    ];

    /// Wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Confession => "Confession",
            Category::Thought => "Thought",
            Category::Story => "Story",
            Category::Vent => "Vent",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = EchoesError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                EchoesError::Validation(format!(
                    "Unknown category '{}', expected one of Confession, Thought, Story, Vent",
                    s
                ))
            })
    }
}

/// A materialized post as seen in a feed snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub text: String,
    pub category: Category,
    #[serde(default)]
    pub likes: u64,
    /// Absent while the store has not yet stamped the write
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(rename = "authorId")]
    pub author_id: String,
}

impl Post {
    /// Sort key; unstamped posts sort as the epoch.
    pub fn sort_key(&self) -> i64 {
        self.created_at
            .map(|ts| ts.timestamp_micros())
            .unwrap_or(0)
    }

    /// Color to render, falling back when the document has none.
    pub fn display_color(&self) -> &str {
        self.color.as_deref().unwrap_or(FALLBACK_COLOR)
    }
}

/// Fields written by an append
///
/// `likes` always starts at zero and `createdAt` is stamped by the store,
/// so neither is carried here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    pub text: String,
    pub category: Category,
    pub color: String,
    #[serde(rename = "authorId")]
    pub author_id: String,
}

/// Trim `raw` and check it against the length bounds.
///
/// Returns the trimmed text that should be stored.
pub fn validate_text(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EchoesError::Validation("Post text is empty".to_string()).into());
    }
    let len = trimmed.chars().count();
    if len > MAX_TEXT_CHARS {
        return Err(EchoesError::Validation(format!(
            "Post text is {} characters, limit is {}",
            len, MAX_TEXT_CHARS
        ))
        .into());
    }
    Ok(trimmed.to_string())
}

/// Order posts newest first.
///
/// Equal timestamps keep no particular order relative to each other.
pub fn sort_newest_first(posts: &mut [Post]) {
    posts.sort_by_key(|p| std::cmp::Reverse(p.sort_key()));
}
