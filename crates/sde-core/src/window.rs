//! Built-in count-based tumbling window.

use crate::error::FunctionError;
use crate::function::WindowFunction;
use crate::message::Message;
use crate::response::FunctionResponse;
use serde::{Deserialize, Serialize};

/// Window sizing for the built-in tumbling count window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    /// Number of messages per window. Treated as at least 1.
    pub size: usize,
}

impl WindowSpec {
    pub fn count(size: usize) -> Self {
        Self { size }
    }
}

/// Buffers incoming messages and releases them in complete bursts of
/// `spec.size`. A partial window left over when the stream ends is dropped;
/// count windows have no end-of-stream trigger.
pub struct TumblingCountWindow {
    name: String,
    spec: WindowSpec,
    buffer: Vec<Message>,
}

impl TumblingCountWindow {
    pub fn new(spec: WindowSpec) -> Self {
        Self {
            name: format!("tumbling-count-{}", spec.size.max(1)),
            spec: WindowSpec {
                size: spec.size.max(1),
            },
            buffer: Vec::new(),
        }
    }

    /// Messages currently buffered in the open window.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl WindowFunction for TumblingCountWindow {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        for message in input {
            self.buffer.push(message);
        }
        let mut out = FunctionResponse::new();
        while self.buffer.len() >= self.spec.size {
            for message in self.buffer.drain(..self.spec.size) {
                out.add(message);
            }
        }
        Ok(out)
    }
}
