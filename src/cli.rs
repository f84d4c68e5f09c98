//! Command-line interface definition for Echoes
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to post, like and watch the shared feed.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::models::Category;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/echoes.yaml";

/// Echoes - anonymous micro-posting board
///
/// Post short anonymous thoughts to a shared feed, like other people's
/// posts and watch the feed update live.
#[derive(Parser, Debug, Clone)]
#[command(name = "echoes")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Store backend to use (sqlite, memory); defaults to sqlite
    #[arg(long, global = true)]
    pub store: Option<String>,

    /// SQLite database path (implies `--store sqlite` unless given)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Echoes
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Publish a new post
    Post {
        /// Category (Confession, Thought, Story, Vent)
        #[arg(short, long, default_value = "Confession")]
        category: Category,

        /// Post text, at most 280 characters
        text: String,
    },

    /// Like a post
    Like {
        /// Id of the post, as shown by `echoes feed`
        post_id: String,
    },

    /// Show the feed, newest first
    Feed {
        /// Keep running and re-render on every change
        #[arg(short, long)]
        follow: bool,

        /// Print posts as JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some(DEFAULT_CONFIG_PATH.to_string()),
            verbose: false,
            store: None,
            db: None,
            command: Commands::Feed {
                follow: false,
                json: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config.as_deref(), Some(DEFAULT_CONFIG_PATH));
        assert!(!cli.verbose);
        assert!(cli.store.is_none());
        assert!(matches!(
            cli.command,
            Commands::Feed {
                follow: false,
                json: false
            }
        ));
    }

    #[test]
    fn test_cli_parse_post_defaults_to_confession() {
        let cli = Cli::try_parse_from(["echoes", "post", "hello there"]).unwrap();
        if let Commands::Post { category, text } = cli.command {
            assert_eq!(category, Category::Confession);
            assert_eq!(text, "hello there");
        } else {
            panic!("Expected Post command");
        }
    }

    #[test]
    fn test_cli_parse_post_with_category() {
        let cli = Cli::try_parse_from(["echoes", "post", "-c", "vent", "ugh"]).unwrap();
        if let Commands::Post { category, .. } = cli.command {
            assert_eq!(category, Category::Vent);
        } else {
            panic!("Expected Post command");
        }
    }

    #[test]
    fn test_cli_rejects_unknown_category() {
        let result = Cli::try_parse_from(["echoes", "post", "-c", "poem", "roses"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parse_like() {
        let cli = Cli::try_parse_from(["echoes", "like", "abc-123"]).unwrap();
        if let Commands::Like { post_id } = cli.command {
            assert_eq!(post_id, "abc-123");
        } else {
            panic!("Expected Like command");
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["echoes", "feed", "--follow", "--db", "feed.db", "-v"])
            .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("feed.db")));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Feed { follow: true, .. }));
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["echoes"]).is_err());
    }
}
