pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "concierge",
    about = "Concierge operator CLI",
    long_about = "Prepare the concierge database, inspect configuration, and hold a conversation turn from the shell.",
    after_help = "Examples:\n  concierge migrate\n  concierge seed\n  concierge chat \"show me laptops\"\n  concierge chat --session 3f0c... \"I want the first one\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo product catalog; safe to run repeatedly")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, checkpoint backend and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Send one message to the assistant and print the reply as JSON")]
    Chat {
        #[arg(long, help = "Continue an existing session instead of starting a new one")]
        session: Option<String>,
        #[arg(help = "Message text")]
        message: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Chat { session, message } => commands::chat::run(session, message),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::{Cli, Command};

    #[test]
    fn chat_accepts_optional_session() {
        let cli = Cli::try_parse_from(["concierge", "chat", "--session", "abc", "hello there"])
            .expect("chat args should parse");
        match cli.command {
            Command::Chat { session, message } => {
                assert_eq!(session.as_deref(), Some("abc"));
                assert_eq!(message, "hello there");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn chat_requires_a_message() {
        assert!(Cli::try_parse_from(["concierge", "chat"]).is_err());
    }
}
