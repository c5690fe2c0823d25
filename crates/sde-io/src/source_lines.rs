//! Text-file source: one message per line.

use anyhow::Context;
use sde_core::{FunctionError, FunctionResponse, Message, SourceFunction};
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::info;

/// Reads the whole file during `init` and emits one text message per line.
/// Each message is tagged with the file path and 1-based line number.
pub struct TextLinesSource {
    id: String,
    path: PathBuf,
    lines: VecDeque<(usize, String)>,
    loaded: bool,
}

impl TextLinesSource {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            lines: VecDeque::new(),
            loaded: false,
        }
    }
}

impl SourceFunction for TextLinesSource {
    fn name(&self) -> &str {
        &self.id
    }

    fn init(&mut self) -> Result<(), FunctionError> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))
            .map_err(|e| FunctionError::with_source("text source init failed", e))?;
        self.lines = content
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line.to_string()))
            .collect();
        self.loaded = true;
        info!(source = %self.id, path = %self.path.display(), lines = self.lines.len(), "text file loaded");
        Ok(())
    }

    fn execute(&mut self, _input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        let mut out = FunctionResponse::new();
        if let Some((number, line)) = self.lines.pop_front() {
            out.add(
                Message::text(line)
                    .with_metadata("source.path", self.path.display().to_string())
                    .with_metadata("source.line", number.to_string()),
            );
        }
        Ok(out)
    }

    fn has_next(&self) -> bool {
        self.loaded && !self.lines.is_empty()
    }

    fn close(&mut self) -> Result<(), FunctionError> {
        self.lines.clear();
        Ok(())
    }
}
