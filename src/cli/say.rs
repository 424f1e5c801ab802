//! One-shot `say` command

use std::error::Error;

use super::chat::run_exchange;
use super::render::TerminalRenderer;
use super::{effective_config, start_session, Args};
use crate::utils::logging::TranscriptLog;

pub async fn run_say(args: &Args, prompt: &str) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        eprintln!("Usage: llamaman say <prompt>");
        std::process::exit(1);
    }

    let config = effective_config(args)?;
    let (orchestrator, mut events) = start_session(&config)?;
    let mut renderer = TerminalRenderer::new(std::io::stdout(), TranscriptLog::new(args.log.clone())?);

    match run_exchange(&orchestrator, &mut events, &mut renderer, prompt).await? {
        Some(_) => Ok(()),
        None => std::process::exit(1),
    }
}
