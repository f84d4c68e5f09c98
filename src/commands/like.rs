//! `echoes like`

use colored::Colorize;

use crate::client::EchoesClient;
use crate::config::Config;
use crate::error::Result;
use crate::models::PostId;

/// Add one like to `post_id`.
///
/// # Errors
///
/// Returns the auth or write error; its status message has already been
/// printed.
pub async fn run_like(config: Config, post_id: String) -> Result<()> {
    let client = EchoesClient::from_config(&config)?;
    super::start(&client).await?;

    let post_id = PostId::new(post_id);
    let result = client.like_post(&post_id).await;
    match &result {
        Ok(()) => println!("{} {}", "Liked".green(), post_id.as_str().cyan()),
        Err(_) => super::print_status(&client),
    }

    client.shutdown().await;
    result
}
