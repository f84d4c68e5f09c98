/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `post`: Publish a post
- `like`: Like a post by id
- `feed`: Render the feed once, or follow it live

Each handler builds an [`EchoesClient`](crate::client::EchoesClient) from the
loaded configuration, starts it, does its work and shuts it down again.
*/

pub mod feed;
pub mod like;
pub mod post;

use colored::Colorize;

use crate::client::EchoesClient;
use crate::error::{classify, Result};

/// Print the client's status line, if any, to stderr.
pub(crate) fn print_status(client: &EchoesClient) {
    if let Some(message) = client.status().borrow().as_deref() {
        eprintln!("{}", message.red());
    }
}

/// Print the user-facing message for `err` and hand it back.
pub(crate) fn report(err: anyhow::Error) -> anyhow::Error {
    if let Some(message) = classify(&err).and_then(|e| e.status_message()) {
        eprintln!("{}", message.red());
    }
    err
}

/// Start `client`, reporting a failed start on stderr.
pub(crate) async fn start(client: &EchoesClient) -> Result<()> {
    client.start().await.map(|_| ()).map_err(report)
}
