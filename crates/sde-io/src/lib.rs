//! # SDE I/O - Source and Sink Function Implementations
//!
//! Concrete source and sink functions for SDE pipelines. Sources and sinks
//! are the only components that perform I/O; the engine itself never
//! touches files, sockets, or stdout.
//!
//! ## Sources
//! - **Inline**: replay a fixed list of text items
//! - **Message**: replay prepared messages with their original ids
//! - **Text lines**: read a file at startup, one message per line
//!
//! ## Sinks
//! - **Stdout**: print payloads for development and debugging
//! - **Collect** / **Count**: shared-handle sinks for tests and metrics
//! - **Null**: discard everything

pub mod sink_collect;
pub mod sink_count;
pub mod sink_null;
pub mod sink_stdout;
pub mod source_inline;
pub mod source_lines;

pub use sink_collect::{Collected, CollectSink};
pub use sink_count::CountSink;
pub use sink_null::NullSink;
pub use sink_stdout::StdoutSink;
pub use source_inline::{InlineSource, MessageSource};
pub use source_lines::TextLinesSource;

use sde_core::{SinkFunction, SinkSpec, SourceFunction, SourceSpec};

/// Build a source function from its declarative spec.
pub fn create_source(spec: &SourceSpec) -> Box<dyn SourceFunction> {
    match spec {
        SourceSpec::Inline { id, items } => Box::new(InlineSource::new(id.clone(), items.clone())),
        SourceSpec::TextLines { id, path } => {
            Box::new(TextLinesSource::new(id.clone(), path.clone()))
        }
    }
}

/// Build a sink function from its declarative spec.
pub fn create_sink(spec: &SinkSpec) -> Box<dyn SinkFunction> {
    match spec {
        SinkSpec::Stdout { id } => Box::new(StdoutSink::new(id.clone())),
        SinkSpec::Count { id } => Box::new(CountSink::new(id.clone())),
        SinkSpec::Null { id } => Box::new(NullSink::new(id.clone())),
    }
}
