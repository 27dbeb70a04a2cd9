use crate::cli::HistoryCommand;
use crate::commands::Runtime;
use crate::error::Result;
use crate::storage::{ConversationLog, ConversationTurn};
use colored::Colorize;
use prettytable::{format, Table};

/// Handle history commands
pub fn handle_history(runtime: &Runtime, command: HistoryCommand) -> Result<()> {
    let log = ConversationLog::new(runtime.store.clone(), runtime.config.relay.history_cap);

    match command {
        HistoryCommand::Show { id, json } => {
            let turns = log.get(&id)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&turns)?);
                return Ok(());
            }

            if turns.is_empty() {
                println!("{}", format!("No turns stored for {}.", id).yellow());
                return Ok(());
            }

            print_turns(&id, &turns);
        }
        HistoryCommand::Clear { id } => {
            // clearing a missing conversation is not an error
            log.clear(&id)?;
            println!("{}", format!("Cleared conversation {}", id).green());
        }
    }

    Ok(())
}

fn print_turns(id: &str, turns: &[ConversationTurn]) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "#".bold(),
        "Question".bold(),
        "Answer".bold()
    ]);

    for (i, turn) in turns.iter().enumerate() {
        table.add_row(prettytable::row![
            i + 1,
            truncate(&turn.question.text(), 40),
            truncate(&turn.answer, 60)
        ]);
    }

    println!("\nConversation {}:", id.cyan());
    table.printstd();
    println!();
}

/// First `max` characters of `text`, with an ellipsis when cut
fn truncate(text: &str, max: usize) -> String {
    let text = text.replace('\n', " ");
    if text.chars().count() <= max {
        return text;
    }
    let head: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", head)
}
