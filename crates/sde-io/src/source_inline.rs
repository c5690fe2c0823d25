//! In-memory sources: replay prepared items or messages.

use sde_core::{FunctionError, FunctionResponse, Message, SourceFunction};
use std::collections::VecDeque;
use tracing::debug;

/// Emits one text message per invocation from a fixed list of items.
pub struct InlineSource {
    id: String,
    items: VecDeque<String>,
}

impl InlineSource {
    pub fn new(id: impl Into<String>, items: Vec<String>) -> Self {
        Self {
            id: id.into(),
            items: items.into(),
        }
    }
}

impl SourceFunction for InlineSource {
    fn name(&self) -> &str {
        &self.id
    }

    fn init(&mut self) -> Result<(), FunctionError> {
        debug!(source = %self.id, items = self.items.len(), "inline source ready");
        Ok(())
    }

    fn execute(&mut self, _input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        let mut out = FunctionResponse::new();
        if let Some(item) = self.items.pop_front() {
            out.add(Message::text(item));
        }
        Ok(out)
    }

    fn has_next(&self) -> bool {
        !self.items.is_empty()
    }
}

/// Replays prepared messages in order, one per invocation. Useful wherever
/// deterministic ids and payloads matter, e.g. in tests.
pub struct MessageSource {
    id: String,
    messages: VecDeque<Message>,
}

impl MessageSource {
    pub fn new(id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            id: id.into(),
            messages: messages.into(),
        }
    }
}

impl SourceFunction for MessageSource {
    fn name(&self) -> &str {
        &self.id
    }

    fn execute(&mut self, _input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        let mut out = FunctionResponse::new();
        if let Some(message) = self.messages.pop_front() {
            out.add(message);
        }
        Ok(out)
    }

    fn has_next(&self) -> bool {
        !self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_source_drains_in_order() {
        let mut source = InlineSource::new("src", vec!["a".into(), "b".into()]);
        assert!(source.has_next());
        let first = source.execute(FunctionResponse::new()).unwrap();
        assert_eq!(first.iter().next().unwrap().text_content(), Some("a"));
        let second = source.execute(FunctionResponse::new()).unwrap();
        assert_eq!(second.iter().next().unwrap().text_content(), Some("b"));
        assert!(!source.has_next());
    }

    #[test]
    fn message_source_keeps_ids() {
        let prepared = vec![
            Message::with_id(7, sde_core::ContentKind::Text, sde_core::Payload::Text("x".into())),
        ];
        let mut source = MessageSource::new("src", prepared);
        let out = source.execute(FunctionResponse::new()).unwrap();
        assert_eq!(out.iter().next().unwrap().id(), 7);
        assert!(!source.has_next());
    }
}
