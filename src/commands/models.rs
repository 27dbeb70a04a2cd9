//! Model listing command for Relaywiz
//!
//! Lists the chat models the stored API key can use, marking the one the
//! relay currently sends and the ones that accept images.

use crate::commands::Runtime;
use crate::error::{Result, RelaywizError};
use crate::providers::ModelInfo;
use prettytable::{row, Table};

/// List available chat models
///
/// # Arguments
///
/// * `runtime` - Store and provider to query with
/// * `json` - Print JSON instead of a table
///
/// # Errors
///
/// Returns `MissingCredentials` when no API key is stored, or the
/// provider's error if listing fails
///
/// # Examples
///
/// ```no_run
/// use relaywiz::commands::{models::list_models, Runtime};
/// use relaywiz::config::Config;
///
/// # async fn example() -> anyhow::Result<()> {
/// let runtime = Runtime::open(Config::default())?;
/// list_models(&runtime, false).await?;
/// # Ok(())
/// # }
/// ```
pub async fn list_models(runtime: &Runtime, json: bool) -> Result<()> {
    let settings = runtime.settings()?;
    let api_key = settings.require_api_key()?;

    tracing::info!("Listing models");
    let models = runtime.provider.list_models(api_key).await?;

    if json {
        output_models_json(&models)?;
        return Ok(());
    }

    if models.is_empty() {
        println!("No chat models available for this API key");
        return Ok(());
    }

    output_models_table(&models, &settings.model);
    Ok(())
}

/// Output models in JSON format
///
/// # Errors
///
/// Returns `RelaywizError::Serialization` if serialization fails
fn output_models_json(models: &[ModelInfo]) -> Result<()> {
    let json = serde_json::to_string_pretty(models).map_err(RelaywizError::Serialization)?;
    println!("{}", json);
    Ok(())
}

/// Output models in table format
fn output_models_table(models: &[ModelInfo], current: &str) {
    let mut table = Table::new();
    table.add_row(row!["Model", "Vision", "Active"]);

    for model in models {
        table.add_row(row![
            model.id,
            if model.supports_vision() { "yes" } else { "no" },
            if model.id == current { "*" } else { "" }
        ]);
    }

    println!("\nAvailable models:\n");
    table.printstd();
    println!();
}
