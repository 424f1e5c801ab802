//! Prints exchange events to a terminal.
//!
//! Assistant text arrives as full-text-so-far snapshots; only the new suffix
//! is written. Output that may turn out to be a function call is held back
//! until it is either removed by the orchestrator or proves to be prose.

use std::io::Write;

use tracing::debug;

use crate::core::message::{Message, Role};
use crate::core::orchestrator::ExchangeEvent;
use crate::utils::logging::TranscriptLog;

const DIRECTIVE_TAG: &str = "<function=";

fn may_be_directive(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('{')
        || trimmed.starts_with(DIRECTIVE_TAG)
        || (!trimmed.is_empty() && DIRECTIVE_TAG.starts_with(trimmed))
}

pub struct TerminalRenderer<W: Write> {
    out: W,
    log: TranscriptLog,
    /// Latest snapshot of the assistant message being streamed.
    current: Option<String>,
    /// How much of `current` has been written.
    printed: usize,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W, log: TranscriptLog) -> Self {
        Self {
            out,
            log,
            current: None,
            printed: 0,
        }
    }

    pub fn log(&self) -> &TranscriptLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut TranscriptLog {
        &mut self.log
    }

    pub fn handle(&mut self, event: ExchangeEvent) -> std::io::Result<()> {
        match event {
            ExchangeEvent::MessageAppended(message) => {
                self.finish()?;
                match message.role {
                    Role::Assistant => {
                        self.current = Some(message.content);
                        self.printed = 0;
                    }
                    Role::System => {
                        writeln!(self.out, "## {}", message.content)?;
                        self.record(&message);
                    }
                    Role::User => self.record(&message),
                }
            }
            ExchangeEvent::AssistantUpdated(text) => {
                self.current = Some(text);
                self.write_progress(false)?;
            }
            ExchangeEvent::MessageRemoved(message) => {
                debug!(chars = message.content.len(), "Hiding function call output");
                if self.printed > 0 {
                    writeln!(self.out)?;
                }
                self.current = None;
                self.printed = 0;
            }
            ExchangeEvent::ToolInvoked { name, result, .. } => {
                debug!(%name, %result, "Tool invoked");
            }
        }
        self.out.flush()
    }

    /// Flush whatever is still held back and close the assistant line.
    pub fn finish(&mut self) -> std::io::Result<()> {
        if self.current.is_none() {
            return Ok(());
        }
        self.write_progress(true)?;
        if let Some(text) = self.current.take() {
            if !text.is_empty() {
                writeln!(self.out)?;
                self.record(&Message::assistant(text));
            }
        }
        self.printed = 0;
        self.out.flush()
    }

    fn write_progress(&mut self, force: bool) -> std::io::Result<()> {
        let Some(text) = self.current.as_deref() else {
            return Ok(());
        };
        if self.printed == 0 && !force && may_be_directive(text) {
            return Ok(());
        }
        match text.get(self.printed..) {
            Some(suffix) => self.out.write_all(suffix.as_bytes())?,
            None => {
                // The snapshot no longer extends what was printed.
                writeln!(self.out)?;
                self.out.write_all(text.as_bytes())?;
            }
        }
        self.printed = text.len();
        Ok(())
    }

    fn record(&self, message: &Message) {
        if let Err(err) = self.log.log_message(message) {
            eprintln!("⚠️  Could not write to log: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> TerminalRenderer<Vec<u8>> {
        TerminalRenderer::new(Vec::new(), TranscriptLog::new(None).unwrap())
    }

    fn output(renderer: &TerminalRenderer<Vec<u8>>) -> String {
        String::from_utf8(renderer.out.clone()).unwrap()
    }

    #[test]
    fn prints_only_new_suffixes() {
        let mut r = renderer();
        r.handle(ExchangeEvent::MessageAppended(Message::user("hi"))).unwrap();
        r.handle(ExchangeEvent::MessageAppended(Message::assistant(""))).unwrap();
        r.handle(ExchangeEvent::AssistantUpdated("Hel".into())).unwrap();
        r.handle(ExchangeEvent::AssistantUpdated("Hello".into())).unwrap();
        r.finish().unwrap();
        assert_eq!(output(&r), "Hello\n");
    }

    #[test]
    fn hides_function_calls_that_are_removed() {
        let mut r = renderer();
        r.handle(ExchangeEvent::MessageAppended(Message::assistant(""))).unwrap();
        r.handle(ExchangeEvent::AssistantUpdated("<func".into())).unwrap();
        r.handle(ExchangeEvent::AssistantUpdated("<function=add>{}</function>".into()))
            .unwrap();
        r.handle(ExchangeEvent::MessageRemoved(Message::assistant(
            "<function=add>{}</function>",
        )))
        .unwrap();
        r.handle(ExchangeEvent::MessageAppended(Message::system(
            "Calling function add(NaN, NaN)",
        )))
        .unwrap();
        assert_eq!(output(&r), "## Calling function add(NaN, NaN)\n");
    }

    #[test]
    fn held_text_that_is_not_a_call_is_printed() {
        let mut r = renderer();
        r.handle(ExchangeEvent::MessageAppended(Message::assistant(""))).unwrap();
        r.handle(ExchangeEvent::AssistantUpdated("<".into())).unwrap();
        assert_eq!(output(&r), "");
        r.handle(ExchangeEvent::AssistantUpdated("<b> is bold".into())).unwrap();
        r.finish().unwrap();
        assert_eq!(output(&r), "<b> is bold\n");
    }

    #[test]
    fn malformed_call_is_shown_when_the_exchange_ends() {
        let mut r = renderer();
        r.handle(ExchangeEvent::MessageAppended(Message::assistant(""))).unwrap();
        r.handle(ExchangeEvent::AssistantUpdated("{\"oops\"".into())).unwrap();
        assert_eq!(output(&r), "");
        r.finish().unwrap();
        assert_eq!(output(&r), "{\"oops\"\n");
    }
}
