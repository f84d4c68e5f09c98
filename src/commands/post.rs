//! `echoes post`

use colored::Colorize;

use crate::client::EchoesClient;
use crate::config::Config;
use crate::error::Result;
use crate::models::Category;

/// Publish `text` under `category`.
///
/// # Errors
///
/// Returns the validation, auth or write error; its status message has
/// already been printed.
pub async fn run_post(config: Config, text: String, category: Category) -> Result<()> {
    let client = EchoesClient::from_config(&config)?;
    super::start(&client).await?;

    let result = client.submit_post(&text, category).await;
    match &result {
        Ok(id) => {
            println!("{} {}", "Echo sent".green(), id.as_str().cyan());
        }
        Err(e) => {
            tracing::debug!(error = %e, "Post failed");
            super::print_status(&client);
        }
    }

    client.shutdown().await;
    result.map(|_| ())
}
