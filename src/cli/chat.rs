//! Interactive line-oriented chat.

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::render::TerminalRenderer;
use super::{effective_config, start_session, Args};
use crate::core::orchestrator::{ExchangeEvent, ExchangeOutcome, Orchestrator};
use crate::tools::ToolRegistry;
use crate::utils::logging::TranscriptLog;

#[derive(Debug, PartialEq, Eq)]
enum ChatCommand {
    Quit,
    Clear,
    Tools,
    Help,
    Log(Option<PathBuf>),
    Unknown(String),
}

fn parse_command(line: &str) -> Option<ChatCommand> {
    let rest = line.strip_prefix('/')?;
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    Some(match name {
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "clear" | "reset" => ChatCommand::Clear,
        "tools" => ChatCommand::Tools,
        "help" => ChatCommand::Help,
        "log" if arg.is_empty() => ChatCommand::Log(None),
        "log" => ChatCommand::Log(Some(PathBuf::from(arg))),
        other => ChatCommand::Unknown(other.to_string()),
    })
}

pub fn print_tools(registry: &ToolRegistry) {
    for tool in registry.iter() {
        let args: Vec<String> = tool
            .args
            .iter()
            .map(|arg| format!("{}: {}", arg.name, arg.ty.as_str()))
            .collect();
        println!("  {}({}) - {}", tool.name, args.join(", "), tool.description);
    }
}

fn help_text(log: &TranscriptLog) -> String {
    format!(
        "Commands:\n\
         \x20 /clear            Start over with only the system prompt\n\
         \x20 /tools            List the available tools\n\
         \x20 /log <filename>   Enable logging to specified file\n\
         \x20 /log              Toggle logging pause/resume\n\
         \x20 /quit             Leave the chat\n\
         Logging: {}\n\
         Press Ctrl+C while a reply is streaming to abort it.",
        log.status_string()
    )
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

pub async fn run_chat(args: &Args) -> Result<(), Box<dyn Error>> {
    let config = effective_config(args)?;
    let (orchestrator, mut events) = start_session(&config)?;
    let mut renderer = TerminalRenderer::new(std::io::stdout(), TranscriptLog::new(args.log.clone())?);

    println!(
        "llamaman: {} on {} (max {} tool steps). Type /help for commands.",
        orchestrator.client().model(),
        orchestrator.client().platform(),
        orchestrator.max_steps()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Some(ChatCommand::Quit) => break,
            Some(ChatCommand::Clear) => match orchestrator.reset() {
                Ok(()) => {
                    if let Err(err) = renderer.log().log_note("Conversation cleared") {
                        eprintln!("⚠️  Could not write to log: {err}");
                    }
                    println!("Conversation cleared.");
                }
                Err(err) => eprintln!("❌ {err}"),
            },
            Some(ChatCommand::Tools) => print_tools(orchestrator.registry()),
            Some(ChatCommand::Help) => println!("{}", help_text(renderer.log())),
            Some(ChatCommand::Log(Some(path))) => match renderer.log_mut().set_log_file(path) {
                Ok(status) => println!("{status}"),
                Err(err) => eprintln!("❌ Could not open log file: {err}"),
            },
            Some(ChatCommand::Log(None)) => match renderer.log_mut().toggle_logging() {
                Ok(status) => println!("{status}"),
                Err(err) => eprintln!("❌ {err}"),
            },
            Some(ChatCommand::Unknown(name)) => {
                eprintln!("❌ Unknown command: /{name}. Type /help for commands.")
            }
            None => {
                run_exchange(&orchestrator, &mut events, &mut renderer, line).await?;
            }
        }
    }
    Ok(())
}

/// Drive one exchange, rendering events as they arrive. Ctrl+C aborts it.
pub(crate) async fn run_exchange<W: Write>(
    orchestrator: &Orchestrator,
    events: &mut mpsc::UnboundedReceiver<ExchangeEvent>,
    renderer: &mut TerminalRenderer<W>,
    text: &str,
) -> std::io::Result<Option<ExchangeOutcome>> {
    let abort = orchestrator.abort_handle();
    let exchange = orchestrator.send(text);
    tokio::pin!(exchange);

    let result = loop {
        tokio::select! {
            result = &mut exchange => break result,
            Some(event) = events.recv() => renderer.handle(event)?,
            _ = tokio::signal::ctrl_c() => {
                abort.abort();
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        renderer.handle(event)?;
    }
    renderer.finish()?;

    match result {
        Ok(outcome) => Ok(Some(outcome)),
        Err(err) => {
            eprintln!("❌ Error: {err}");
            Ok(None)
        }
    }
}
