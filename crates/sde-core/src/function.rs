//! Function traits: the business-logic units hosted inside operators.
//!
//! Functions receive a [`FunctionResponse`] and return a new one; the
//! returned response owns whatever the function emits. Every `execute` is
//! straight-line synchronous code — the engine never suspends inside a
//! function body, under any scheduling mode — so implementations do not
//! need to be async and must not block indefinitely.
//!
//! The set of function implementations is open: operators store boxed
//! trait objects, and anything implementing the matching trait can be
//! plugged into a pipeline.

use crate::error::FunctionError;
use crate::message::Message;
use crate::response::FunctionResponse;
use std::hash::{Hash, Hasher};

/// Producer at the edge of the graph.
///
/// Sources are the only functions the engine polls: `has_next` is sampled
/// between invocations, and a `false` answer marks the source exhausted.
/// An empty response from `execute` does *not* end the stream on its own.
///
/// ## Examples
/// - in-memory replay of prepared messages
/// - line-by-line file reader
/// - network ingest (must honour cancellation by returning promptly)
pub trait SourceFunction: Send {
    fn name(&self) -> &str;

    /// Called once by the owning operator's `open`, before any `execute`.
    fn init(&mut self) -> Result<(), FunctionError> {
        Ok(())
    }

    /// Produce the next batch of messages. The input response is always
    /// empty and may be ignored.
    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError>;

    /// Whether another `execute` call can produce data.
    fn has_next(&self) -> bool;

    /// Called once by the owning operator's `close`, after the last
    /// `execute`, on every exit path (completion, stop, or error).
    fn close(&mut self) -> Result<(), FunctionError> {
        Ok(())
    }
}

/// One-to-one transformation, order preserved.
///
/// `execute` returns exactly as many messages as it received; dropping a
/// message at some position is expressed by simply not re-adding it, which
/// removes that position from the output.
pub trait MapFunction: Send {
    fn name(&self) -> &str;

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError>;
}

/// Subsequence selection: retained messages are forwarded unmodified and
/// in their original order.
pub trait FilterFunction: Send {
    fn name(&self) -> &str;

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError>;
}

/// One-to-many transformation: each input may expand to zero or more
/// output messages.
pub trait FlatMapFunction: Send {
    fn name(&self) -> &str;

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError>;
}

/// Key extraction for partition tagging.
///
/// The operator pairs the extracted key with a [`KeyStrategy`] and records
/// the result in the message metadata before forwarding.
pub trait KeyByFunction: Send {
    fn name(&self) -> &str;

    fn key(&mut self, message: &Message) -> Result<String, FunctionError>;
}

/// Stateful batching: buffers inputs and emits them in bursts.
pub trait WindowFunction: Send {
    fn name(&self) -> &str;

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError>;
}

/// Running aggregation: consumes inputs and emits summary records.
pub trait AggregateFunction: Send {
    fn name(&self) -> &str;

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError>;
}

/// Consumer at the edge of the graph. Sinks perform all pipeline output
/// I/O; the engine itself never writes files, opens sockets, or prints.
pub trait SinkFunction: Send {
    fn name(&self) -> &str;

    fn init(&mut self) -> Result<(), FunctionError> {
        Ok(())
    }

    /// Consume every input message. The returned response must be empty.
    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError>;

    fn close(&mut self) -> Result<(), FunctionError> {
        Ok(())
    }
}

/// The only two-input function variant. Invoked by a join operator with
/// one message per side once both of its input buffers hold data.
pub trait JoinFunction: Send {
    fn name(&self) -> &str;

    fn execute_pair(
        &mut self,
        left: FunctionResponse,
        right: FunctionResponse,
    ) -> Result<FunctionResponse, FunctionError>;
}

/// How a key-by operator turns an extracted key into a metadata tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Store the raw key under the `key` metadata entry.
    Direct,
    /// Hash the key into one of `partitions` buckets and store the bucket
    /// index under the `partition` metadata entry.
    Hash { partitions: usize },
}

impl KeyStrategy {
    /// Metadata entry `(key, value)` to attach for the given extracted key.
    pub fn apply(&self, key: &str) -> (&'static str, String) {
        match self {
            KeyStrategy::Direct => ("key", key.to_string()),
            KeyStrategy::Hash { partitions } => {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                key.hash(&mut hasher);
                let bucket = hasher.finish() % (*partitions).max(1) as u64;
                ("partition", bucket.to_string())
            }
        }
    }
}
