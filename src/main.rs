//! Relaywiz - streaming AI text actions
//!
#![doc = "Main entry point for the Relaywiz CLI."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relaywiz::cli::{AuthCommand, Cli, Commands, SettingsCommand};
use relaywiz::commands::{self, settings::SettingsUpdate, Runtime};
use relaywiz::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);
    relaywiz::relay::metrics::init_metrics_exporter();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Run {
            task,
            language,
            tone,
            text,
        } => {
            commands::run::run_task(config, task, language, tone, text).await?;
        }
        Commands::Chat { image, language } => {
            tracing::info!("Starting interactive chat");
            commands::chat::run_chat(config, image, language).await?;
        }
        Commands::Read { output, text } => {
            commands::read::run_read(config, &output, text).await?;
        }
        Commands::Ocr { image, solve } => {
            commands::ocr::run_ocr(config, &image, solve).await?;
        }
        Commands::History { command } => {
            let runtime = Runtime::open(config)?;
            commands::history::handle_history(&runtime, command)?;
        }
        Commands::Auth { command } => {
            let runtime = Runtime::open(config)?;
            match command {
                AuthCommand::Set { key, no_verify } => {
                    commands::auth::set_key(&runtime, &key, no_verify).await?
                }
                AuthCommand::Clear => commands::auth::clear_key(&runtime)?,
                AuthCommand::Status => commands::auth::status(&runtime)?,
            }
        }
        Commands::Settings { command } => {
            let runtime = Runtime::open(config)?;
            match command {
                SettingsCommand::Show { json } => commands::settings::show(&runtime, json)?,
                SettingsCommand::Set {
                    model,
                    language,
                    popup_mode,
                    default_task,
                    voice,
                } => {
                    let update = SettingsUpdate {
                        model,
                        language,
                        popup_mode,
                        default_task,
                        voice,
                    };
                    commands::settings::set(&runtime, update)?;
                }
            }
        }
        Commands::Models { json } => {
            let runtime = Runtime::open(config)?;
            commands::models::list_models(&runtime, json).await?;
        }
    }

    Ok(())
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so streamed answers on stdout stay clean.
fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "relaywiz=debug" } else { "relaywiz=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
