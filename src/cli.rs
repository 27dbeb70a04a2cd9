//! Command-line interface definition for Relaywiz
//!
//! This module defines the CLI structure using clap's derive API. Each
//! text command drives the same page agent and relay worker a browser
//! page would, with the terminal as the popup.

use crate::relay::TaskKind;
use crate::storage::PopupMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Relaywiz - streaming AI text actions
///
/// Translate, explain, summarize, rewrite or chat about text, read it
/// aloud, or solve a quiz from a screenshot.
#[derive(Parser, Debug, Clone)]
#[command(name = "relaywiz")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Override the settings/history store directory
    #[arg(long)]
    pub store: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Relaywiz
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a single-shot text task and stream the answer
    Run {
        /// Task: translate, explain, summarize, rewrite, grammar, prompt
        #[arg(short, long)]
        task: Option<TaskKind>,

        /// Target language code; defaults to the stored native language
        #[arg(short, long)]
        language: Option<String>,

        /// Tone for prompt tasks
        #[arg(long)]
        tone: Option<String>,

        /// Text to process; read from stdin when omitted
        text: Option<String>,
    },

    /// Chat interactively, optionally about an image
    Chat {
        /// Image URL or data URL to discuss
        #[arg(long)]
        image: Option<String>,

        /// Target language code; defaults to the stored native language
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Read text aloud into an MP3 file
    Read {
        /// Output file
        #[arg(short, long, default_value = "speech.mp3")]
        output: PathBuf,

        /// Text to read; read from stdin when omitted
        text: Option<String>,
    },

    /// Recognize text in a PNG screenshot
    Ocr {
        /// PNG file to recognize
        image: PathBuf,

        /// Answer the recognized quiz instead of printing the text
        #[arg(long)]
        solve: bool,
    },

    /// Inspect stored conversations
    History {
        /// History subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Manage the stored API key
    Auth {
        /// Auth subcommand
        #[command(subcommand)]
        command: AuthCommand,
    },

    /// Show or change stored settings
    Settings {
        /// Settings subcommand
        #[command(subcommand)]
        command: SettingsCommand,
    },

    /// List chat models available to the stored key
    Models {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

/// History subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// Show the stored turns of a conversation
    Show {
        /// Conversation id
        id: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Forget a conversation
    Clear {
        /// Conversation id
        id: String,
    },
}

/// Auth subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum AuthCommand {
    /// Store an API key
    Set {
        /// API key
        key: String,

        /// Store the key without checking it against the provider
        #[arg(long)]
        no_verify: bool,
    },

    /// Forget the stored API key
    Clear,

    /// Report whether a key is stored
    Status,
}

/// Settings subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SettingsCommand {
    /// Print the current settings
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Change one or more settings
    Set {
        /// Chat model
        #[arg(long)]
        model: Option<String>,

        /// Native language code
        #[arg(long)]
        language: Option<String>,

        /// Selection behavior: display_icon, immediately, hide
        #[arg(long)]
        popup_mode: Option<PopupMode>,

        /// Task run by the quick action
        #[arg(long)]
        default_task: Option<TaskKind>,

        /// Text-to-speech voice
        #[arg(long)]
        voice: Option<String>,
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
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            store: None,
            command: Commands::Auth {
                command: AuthCommand::Status,
            },
        }
    }
}
