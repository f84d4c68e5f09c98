//! `echoes feed`
//!
//! Renders the feed newest first. With `--follow` the whole feed is printed
//! again on every snapshot until interrupted.

use chrono::{DateTime, Utc};
use colored::{Color, ColoredString, Colorize};

use crate::client::EchoesClient;
use crate::config::Config;
use crate::error::{EchoesError, Result, LOAD_FAILED_STATUS};
use crate::feed::{FeedSnapshot, FeedState, FeedStatus};
use crate::models::{Category, Post};

pub const EMPTY_FEED_MESSAGE: &str = "No echoes yet. Be the first to speak.";
pub const CONNECTING_MESSAGE: &str = "Connecting to the ether...";
pub const JUST_NOW: &str = "Just now";
pub const REPLY_MARKER: &str = "Reply";

/// Show the feed.
///
/// # Errors
///
/// Returns an error if sign-in fails or the feed cannot be loaded.
pub async fn run_feed(config: Config, follow: bool, json: bool) -> Result<()> {
    let client = EchoesClient::from_config(&config)?;
    if follow && !json {
        println!("{}", CONNECTING_MESSAGE.dimmed());
    }
    super::start(&client).await?;

    let result = if follow {
        follow_feed(&client, json).await
    } else {
        print_once(&client, json).await
    };

    client.shutdown().await;
    result
}

async fn print_once(client: &EchoesClient, json: bool) -> Result<()> {
    let mut posts = client.posts();
    let state = posts
        .wait_for(|s| is_settled(&s.status))
        .await
        .map_err(|e| EchoesError::RemoteRead(e.to_string()))?
        .clone();
    print_state(&state, json)
}

async fn follow_feed(client: &EchoesClient, json: bool) -> Result<()> {
    let mut posts = client.posts();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, leaving feed");
                return Ok(());
            }
            changed = posts.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = posts.borrow_and_update().clone();
                match &state.status {
                    FeedStatus::Live => print_state(&state, json)?,
                    FeedStatus::Unavailable(_) => eprintln!("{}", LOAD_FAILED_STATUS.red()),
                    FeedStatus::Idle | FeedStatus::Loading => {}
                }
            }
        }
    }
}

fn is_settled(status: &FeedStatus) -> bool {
    matches!(status, FeedStatus::Live | FeedStatus::Unavailable(_))
}

fn print_state(state: &FeedState, json: bool) -> Result<()> {
    if let FeedStatus::Unavailable(reason) = &state.status {
        eprintln!("{}", LOAD_FAILED_STATUS.red());
        return Err(EchoesError::RemoteRead(reason.clone()).into());
    }
    if json {
        println!("{}", serde_json::to_string_pretty(state.snapshot.posts())?);
    } else {
        println!("{}", render_feed(&state.snapshot, Utc::now()));
    }
    Ok(())
}

/// Render every post of `snapshot`, or the empty-feed message.
pub fn render_feed(snapshot: &FeedSnapshot, now: DateTime<Utc>) -> String {
    if snapshot.is_empty() {
        return EMPTY_FEED_MESSAGE.italic().to_string();
    }
    snapshot
        .posts()
        .iter()
        .map(|post| render_post(post, now))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render one post card.
pub fn render_post(post: &Post, now: DateTime<Utc>) -> String {
    let bar = "▌".color(accent(post.display_color()));
    format!(
        "{bar} {}  {}\n{bar} {}\n{bar} {} {}   {}   {}",
        category_badge(post.category),
        relative_age(post.created_at, now).dimmed(),
        post.text,
        "♥".red(),
        post.likes,
        REPLY_MARKER.dimmed(),
        post.id.as_str().dimmed()
    )
}

/// Terminal color closest to the start of a stored gradient.
fn accent(gradient: &str) -> Color {
    let start = gradient
        .split_whitespace()
        .find_map(|part| part.strip_prefix("from-"))
        .and_then(|rest| rest.split('-').next())
        .unwrap_or_default();
    match start {
        "pink" | "rose" => Color::Magenta,
        "purple" | "indigo" | "violet" => Color::BrightMagenta,
        "cyan" | "sky" => Color::Cyan,
        "emerald" | "green" | "teal" => Color::Green,
        "orange" | "amber" | "yellow" => Color::Yellow,
        "red" => Color::Red,
        _ => Color::Blue,
    }
}

fn category_badge(category: Category) -> ColoredString {
    let label = format!("[{}]", category.as_str().to_uppercase());
    match category {
        Category::Confession => label.magenta().bold(),
        Category::Thought => label.cyan().bold(),
        Category::Story => label.yellow().bold(),
        Category::Vent => label.red().bold(),
    }
}

/// Age of a post for display.
///
/// A post the store has not stamped yet is shown as just posted.
pub fn relative_age(created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(created_at) = created_at else {
        return JUST_NOW.to_string();
    };
    let age = now.signed_duration_since(created_at);

    let (amount, unit) = if age.num_seconds() < 60 {
        return JUST_NOW.to_string();
    } else if age.num_minutes() < 60 {
        (age.num_minutes(), "minute")
    } else if age.num_hours() < 24 {
        (age.num_hours(), "hour")
    } else if age.num_days() < 30 {
        (age.num_days(), "day")
    } else {
        return created_at.format("%b %-d, %Y").to_string();
    };

    if amount == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", amount, unit)
    }
}
