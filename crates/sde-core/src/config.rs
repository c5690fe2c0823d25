//! Pipeline specification loaded from YAML configuration.
//!
//! These types are the declarative surface consumed by the CLI runner:
//! sources, transforms, sinks, and the edges wiring them together. The
//! concrete function implementations behind each spec variant live in the
//! `sde-io` and `sde-tx` crates.
//!
//! # Example YAML configuration
//!
//! ```yaml
//! name: "uppercase-demo"
//! engine:
//!   mode: pooled
//!   workers: 4
//! sources:
//!   - type: inline
//!     id: "docs"
//!     items: ["hello", "streaming", "world"]
//! transforms:
//!   - type: text_clean
//!     id: "clean"
//!     trim: true
//!     normalize_case: upper
//!   - type: min_length
//!     id: "drop-short"
//!     min_chars: 6
//! sinks:
//!   - type: stdout
//!     id: "out"
//! edges:
//!   - ["docs", "clean"]
//!   - ["clean", "drop-short"]
//!   - ["drop-short", "out"]
//! ```

use crate::aggregate::AggregateOp;
use serde::{Deserialize, Serialize};

/// Scheduling model of a stream engine, fixed for the engine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// The drive loop runs on the caller's thread; operator invocations
    /// are strictly sequential in topological order.
    #[default]
    SingleThreaded,
    /// A fixed-size pool of worker threads; any idle worker may claim any
    /// runnable operator.
    Pooled,
    /// A cooperative single-threaded runtime; operators are tasks that
    /// suspend between invocations.
    Async,
}

/// Engine section of a pipeline spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Scheduling mode for the engine executing this pipeline.
    #[serde(default)]
    pub mode: SchedulingMode,

    /// Worker thread count, used by the pooled mode only.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Edge channel capacity, used by the async mode only.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_workers() -> usize {
    4
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            mode: SchedulingMode::default(),
            workers: default_workers(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Complete pipeline specification.
///
/// Operators are declared by string id; `edges` wires them together as
/// `(from_id, to_id)` pairs. Duplicate pairs are legal and fan the stream
/// out along parallel edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Human-readable name of the pipeline
    pub name: String,

    #[serde(default)]
    pub engine: EngineSettings,

    /// Data source declarations
    pub sources: Vec<SourceSpec>,

    /// Transform declarations
    #[serde(default)]
    pub transforms: Vec<TransformSpec>,

    /// Sink declarations
    pub sinks: Vec<SinkSpec>,

    /// Directed edges defining message flow between operators
    pub edges: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceSpec {
    /// Replay a fixed list of text items, one message per item.
    #[serde(rename = "inline")]
    Inline { id: String, items: Vec<String> },

    /// Read a text file at startup and emit one message per line.
    #[serde(rename = "text_lines")]
    TextLines { id: String, path: String },
}

impl SourceSpec {
    pub fn id(&self) -> &str {
        match self {
            SourceSpec::Inline { id, .. } => id,
            SourceSpec::TextLines { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransformSpec {
    /// Forward every message untouched.
    #[serde(rename = "passthrough")]
    Passthrough { id: String },

    /// Trim and/or normalize the case of text payloads.
    #[serde(rename = "text_clean")]
    TextClean {
        id: String,
        #[serde(default)]
        trim: bool,
        #[serde(default)]
        normalize_case: Option<String>, // "lower", "upper", "title"
    },

    /// Keep only messages whose text payload has at least `min_chars`
    /// characters.
    #[serde(rename = "min_length")]
    MinLength { id: String, min_chars: usize },

    /// Tag each message with a partition derived from its text content.
    #[serde(rename = "key_by")]
    KeyBy {
        id: String,
        #[serde(default)]
        partitions: Option<usize>,
    },

    /// Count-based tumbling window.
    #[serde(rename = "window")]
    Window { id: String, size: usize },

    /// Running aggregation emitting one summary per input.
    #[serde(rename = "aggregate")]
    Aggregate { id: String, ops: Vec<AggregateOp> },
}

impl TransformSpec {
    pub fn id(&self) -> &str {
        match self {
            TransformSpec::Passthrough { id } => id,
            TransformSpec::TextClean { id, .. } => id,
            TransformSpec::MinLength { id, .. } => id,
            TransformSpec::KeyBy { id, .. } => id,
            TransformSpec::Window { id, .. } => id,
            TransformSpec::Aggregate { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SinkSpec {
    /// Print each message to stdout.
    #[serde(rename = "stdout")]
    Stdout { id: String },

    /// Count receipts and log the total at close.
    #[serde(rename = "count")]
    Count { id: String },

    /// Discard everything.
    #[serde(rename = "discard")]
    Null { id: String },
}

impl SinkSpec {
    pub fn id(&self) -> &str {
        match self {
            SinkSpec::Stdout { id } => id,
            SinkSpec::Count { id } => id,
            SinkSpec::Null { id } => id,
        }
    }
}
