use crate::application::commands::Command;
use crate::error::{Result, SettlementError};
use std::io::{BufRead, BufReader, Read};

/// Reads commands from a JSON-lines source.
///
/// Blank lines and lines starting with `#` are skipped. Each command is
/// validated before it is yielded; errors carry the 1-based line number.
pub struct CommandReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
        }
    }

    /// Lazily parses one command per line.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                let line_no = index + 1;
                let line = match line {
                    Ok(line) => line,
                    Err(e) => return Some(Err(SettlementError::from(e))),
                };
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return None;
                }
                Some(parse_line(line_no, trimmed))
            })
    }
}

fn parse_line(line_no: usize, line: &str) -> Result<Command> {
    let command: Command = serde_json::from_str(line)
        .map_err(|e| SettlementError::ValidationError(format!("line {line_no}: {e}")))?;
    command
        .validate()
        .map_err(|e| SettlementError::ValidationError(format!("line {line_no}: {e}")))?;
    Ok(command)
}
