//! Append-only transcript log enabled with `--log FILE` or `/log FILE`.

use crate::core::message::{Message, Role};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct TranscriptLog {
    file_path: Option<PathBuf>,
    is_active: bool,
}

impl TranscriptLog {
    /// A log given on the command line is active immediately.
    pub fn new(log_file: Option<PathBuf>) -> std::io::Result<Self> {
        if let Some(path) = &log_file {
            test_file_access(path)?;
        }
        Ok(TranscriptLog {
            is_active: log_file.is_some(),
            file_path: log_file,
        })
    }

    pub fn set_log_file(&mut self, path: PathBuf) -> std::io::Result<String> {
        test_file_access(&path)?;
        let status = format!("Logging enabled to: {}", path.display());
        self.file_path = Some(path);
        self.is_active = true;
        Ok(status)
    }

    pub fn toggle_logging(&mut self) -> Result<String, String> {
        let Some(path) = &self.file_path else {
            return Err("No log file specified. Use /log <filename> to enable logging first.".into());
        };
        let path = path.display().to_string();
        if self.is_active {
            if let Err(err) = self.log_note("Logging paused") {
                return Err(format!("Could not write to {path}: {err}"));
            }
            self.is_active = false;
            Ok(format!("Logging paused (file: {path})"))
        } else {
            self.is_active = true;
            Ok(format!("Logging resumed to: {path}"))
        }
    }

    /// Record a finished message. Empty assistant placeholders are skipped.
    pub fn log_message(&self, message: &Message) -> std::io::Result<()> {
        let rendered = match message.role {
            Role::User => format!("You: {}", message.content),
            Role::Assistant if message.content.is_empty() => return Ok(()),
            Role::Assistant => message.content.clone(),
            Role::System => format!("## {}", message.content),
        };
        self.write_entry(&rendered)
    }

    /// Record an out-of-band note, such as a reset marker.
    pub fn log_note(&self, note: &str) -> std::io::Result<()> {
        self.write_entry(&format!("## {note}"))
    }

    pub fn status_string(&self) -> String {
        let file_name = |path: &Path| {
            path.file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned()
        };
        match (&self.file_path, self.is_active) {
            (None, _) => "disabled".to_string(),
            (Some(path), true) => format!("active ({})", file_name(path)),
            (Some(path), false) => format!("paused ({})", file_name(path)),
        }
    }

    fn write_entry(&self, content: &str) -> std::io::Result<()> {
        let Some(file_path) = self.file_path.as_ref().filter(|_| self.is_active) else {
            return Ok(());
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let mut writer = BufWriter::new(file);

        for line in content.lines() {
            writeln!(writer, "{line}")?;
        }
        // Blank line between entries, matching the terminal display.
        writeln!(writer)?;
        writer.flush()
    }
}

fn test_file_access(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_roles_in_transcript_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chat.log");
        let log = TranscriptLog::new(Some(path.clone())).unwrap();

        log.log_message(&Message::user("add 1 and 2")).unwrap();
        log.log_message(&Message::system("Calling function add(1, 2)")).unwrap();
        log.log_message(&Message::assistant("")).unwrap();
        log.log_message(&Message::assistant("3\nDone.")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "You: add 1 and 2\n\n## Calling function add(1, 2)\n\n3\nDone.\n\n"
        );
    }

    #[test]
    fn paused_log_writes_only_the_pause_note() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chat.log");
        let mut log = TranscriptLog::new(None).unwrap();
        assert_eq!(log.status_string(), "disabled");
        assert!(log.toggle_logging().is_err());

        log.set_log_file(path.clone()).unwrap();
        assert_eq!(log.status_string(), "active (chat.log)");
        log.toggle_logging().unwrap();
        assert_eq!(log.status_string(), "paused (chat.log)");
        log.log_message(&Message::user("hidden")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "## Logging paused\n\n");
    }

    #[test]
    fn unwritable_path_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("chat.log");
        assert!(TranscriptLog::new(Some(path)).is_err());
    }
}
