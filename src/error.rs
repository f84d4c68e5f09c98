//! Error types for Echoes
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Status line shown when identity acquisition fails
pub const AUTH_FAILED_STATUS: &str = "Authentication failed. Please refresh.";

/// Status line shown when the feed subscription fails or is lost
pub const LOAD_FAILED_STATUS: &str = "Unable to load posts.";

/// Status line shown when appending a post fails
pub const POST_FAILED_STATUS: &str = "Could not post. Try again.";

/// Status line shown when incrementing a like counter fails
pub const LIKE_FAILED_STATUS: &str = "Could not like. Try again.";

/// Main error type for Echoes operations
///
/// The first four variants form the user-facing taxonomy: they are what the
/// feed synchronizer converts into a status line. The remaining variants are
/// ambient failures (configuration, local storage plumbing, IO).
#[derive(Error, Debug)]
pub enum EchoesError {
    /// Identity acquisition failed; fatal to the session
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Subscription failed, was denied, or was lost
    #[error("Remote read error: {0}")]
    RemoteRead(String),

    /// A local precondition failed before any write was attempted
    #[error("Validation error: {0}")]
    Validation(String),

    /// An append or increment failed after validation passed
    #[error("Remote write error: {0}")]
    RemoteWrite(String),

    /// The referenced document does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local storage plumbing errors (database open, schema, paths)
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EchoesError {
    /// Whether the error ends the session for this process.
    ///
    /// Only authentication failures are fatal; everything else leaves the
    /// feed and the input form usable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// User-visible status line for errors in the remote taxonomy.
    ///
    /// Write failures return `None`: the message depends on whether a post
    /// or a like failed, so the feed synchronizer reports those itself.
    /// Validation failures and ambient errors also return `None`.
    pub fn status_message(&self) -> Option<&'static str> {
        match self {
            Self::Auth(_) => Some(AUTH_FAILED_STATUS),
            Self::RemoteRead(_) => Some(LOAD_FAILED_STATUS),
            _ => None,
        }
    }
}

/// Result type alias for Echoes operations
///
/// Uses `anyhow::Error` so callers get context chains; the typed
/// [`EchoesError`] is recoverable with `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;

/// Recover the typed error from an `anyhow::Error`, if there is one.
pub fn classify(err: &anyhow::Error) -> Option<&EchoesError> {
    err.downcast_ref::<EchoesError>()
}
