//! The buffer exchanged between an operator and its function.

use crate::message::Message;

/// An ordered sequence of owned messages, handed from operator to function
/// and back on every invocation.
///
/// A response is never shared: it moves from caller to callee and back, and
/// it is the sole owner of the messages it holds. An empty response means
/// end-of-stream only when returned by a source function; everywhere else
/// it just means "nothing emitted this invocation".
#[derive(Debug, Default)]
pub struct FunctionResponse {
    messages: Vec<Message>,
}

impl FunctionResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message; insertion order is preserved.
    pub fn add(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Release every contained message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    /// Move every message out, leaving the response empty.
    pub fn drain(&mut self) -> std::vec::Drain<'_, Message> {
        self.messages.drain(..)
    }
}

impl From<Vec<Message>> for FunctionResponse {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl FromIterator<Message> for FunctionResponse {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for FunctionResponse {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}
