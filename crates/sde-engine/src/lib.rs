//! # SDE Engine - Graph Execution for Streaming Dataflow Pipelines
//!
//! This crate drives validated execution graphs: submission and lifecycle
//! management, the three scheduling modes (single-threaded, pooled,
//! async), throughput metrics, and the fluent [`PipelineBuilder`].
//!
//! ## Key Components
//!
//! - **[`StreamEngine`]**: owns submitted graphs and their states; drives
//!   them to completion or cooperative stop
//! - **Execution drivers**: one per scheduling mode, all sharing the same
//!   per-run execution plan and the same termination criterion (every
//!   source exhausted, every edge drained)
//! - **[`PipelineBuilder`]**: chainable, move-consuming construction
//!   surface delegating to the engine
//!
//! ## Example
//!
//! ```rust
//! use sde_core::SchedulingMode;
//! use sde_engine::{GraphState, StreamEngine};
//!
//! let engine = StreamEngine::new(SchedulingMode::SingleThreaded);
//! let id = engine.submit(sde_core::ExecutionGraph::new()).unwrap();
//! engine.execute(id).unwrap();
//! assert_eq!(engine.state(id), GraphState::Completed);
//! ```

mod builder;
mod engine;
mod exec_async;
mod exec_pool;
mod exec_single;
mod plan;

pub use builder::PipelineBuilder;
pub use engine::{EngineConfig, GraphId, GraphState, StreamEngine};
