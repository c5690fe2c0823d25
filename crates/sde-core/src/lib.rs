//! # SDE Core - Streaming Dataflow Engine Core Library
//!
//! Foundational types and traits for building streaming dataflow pipelines
//! over multimodal messages. This crate defines the message model, the
//! function and operator abstractions, the execution graph, the error
//! taxonomy, and the YAML pipeline configuration structures shared across
//! the SDE workspace.
//!
//! ## Key Components
//!
//! - **Message model**: move-only [`Message`] records with typed payloads
//!   (text, bytes, embedding vectors), ordered metadata, and a processing
//!   trace; [`FunctionResponse`] as the owned buffer exchanged per
//!   invocation
//! - **Functions**: business-logic traits ([`SourceFunction`],
//!   [`MapFunction`], [`FilterFunction`], [`SinkFunction`],
//!   [`JoinFunction`], ...) hosted inside operators
//! - **Operators**: flow-control shells owning ingress, emission, counters
//!   and lifecycle
//! - **Execution graph**: DAG registry with dual adjacency, deterministic
//!   topological ordering, and cycle detection
//! - **Configuration**: serde-based pipeline specification for the CLI
//!
//! ## Example
//!
//! ```rust
//! use sde_core::{ExecutionGraph, Message};
//!
//! let mut graph = ExecutionGraph::new();
//! assert!(graph.validate());
//!
//! let record = Message::text("hello").with_quality(0.9);
//! assert_eq!(record.text_content(), Some("hello"));
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod function;
pub mod graph;
pub mod message;
pub mod operator;
pub mod response;
pub mod window;

pub use aggregate::{AggregateOp, RunningAggregate};
pub use config::{EngineSettings, PipelineSpec, SchedulingMode, SinkSpec, SourceSpec, TransformSpec};
pub use error::{FunctionError, SdeError};
pub use function::{
    AggregateFunction, FilterFunction, FlatMapFunction, JoinFunction, KeyByFunction, KeyStrategy,
    MapFunction, SinkFunction, SourceFunction, WindowFunction,
};
pub use graph::{ExecutionGraph, OperatorHandle};
pub use message::{ContentKind, Message, MessageId, Payload};
pub use operator::{FunctionSlot, Operator, OperatorId, OperatorKind, OperatorStats};
pub use response::FunctionResponse;
pub use window::{TumblingCountWindow, WindowSpec};
