//! Fluent pipeline construction.
//!
//! A builder wraps an engine reference, a fresh [`ExecutionGraph`], and
//! the id of the last-appended operator. Every chaining method consumes
//! the builder and returns it, so a chain has linear ownership and a
//! half-built chain cannot be reused.
//!
//! Construction errors (a non-source step before `from_source`, a
//! validation failure at `sink`) are deferred: the failing step records
//! the error, later steps become no-ops, and the terminal operations
//! surface it.
//!
//! ```rust,no_run
//! use sde_engine::StreamEngine;
//! use sde_core::SchedulingMode;
//! # use sde_core::{FunctionError, FunctionResponse, Message};
//! # struct Nums;
//! # impl sde_core::SourceFunction for Nums {
//! #     fn name(&self) -> &str { "nums" }
//! #     fn execute(&mut self, _i: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
//! #         Ok(FunctionResponse::new())
//! #     }
//! #     fn has_next(&self) -> bool { false }
//! # }
//! # struct Show;
//! # impl sde_core::SinkFunction for Show {
//! #     fn name(&self) -> &str { "show" }
//! #     fn execute(&mut self, _i: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
//! #         Ok(FunctionResponse::new())
//! #     }
//! # }
//!
//! let engine = StreamEngine::new(SchedulingMode::SingleThreaded);
//! let graph_id = engine
//!     .pipeline()
//!     .from_source(Nums)
//!     .sink(Show)
//!     .execute()
//!     .unwrap();
//! ```

use crate::engine::{GraphId, GraphState, StreamEngine};
use sde_core::{
    AggregateFunction, AggregateOp, ExecutionGraph, FilterFunction, FlatMapFunction, FunctionSlot,
    JoinFunction, KeyByFunction, KeyStrategy, MapFunction, Operator, OperatorId, OperatorKind,
    RunningAggregate, SdeError, SinkFunction, SourceFunction, TumblingCountWindow, WindowFunction,
    WindowSpec,
};

/// Chainable, move-consuming pipeline builder. Created by
/// [`StreamEngine::pipeline`].
pub struct PipelineBuilder<'a> {
    engine: &'a StreamEngine,
    graph: ExecutionGraph,
    last: Option<OperatorId>,
    graph_id: Option<GraphId>,
    error: Option<SdeError>,
}

impl<'a> PipelineBuilder<'a> {
    pub(crate) fn new(engine: &'a StreamEngine) -> Self {
        Self {
            engine,
            graph: ExecutionGraph::new(),
            last: None,
            graph_id: None,
            error: None,
        }
    }

    /// Append a source operator. Sources do not connect to a predecessor,
    /// so this is also the only legal first step.
    pub fn from_source(mut self, function: impl SourceFunction + 'static) -> Self {
        if self.error.is_some() {
            return self;
        }
        let name = function.name().to_string();
        let slot = FunctionSlot::Source(Box::new(function));
        match Operator::new(name, OperatorKind::Source, slot)
            .and_then(|op| self.graph.add_operator(op))
        {
            Ok(id) => self.last = Some(id),
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn map(self, function: impl MapFunction + 'static) -> Self {
        let name = function.name().to_string();
        self.append(name, OperatorKind::Map, FunctionSlot::Map(Box::new(function)))
    }

    pub fn filter(self, function: impl FilterFunction + 'static) -> Self {
        let name = function.name().to_string();
        self.append(
            name,
            OperatorKind::Filter,
            FunctionSlot::Filter(Box::new(function)),
        )
    }

    pub fn flat_map(self, function: impl FlatMapFunction + 'static) -> Self {
        let name = function.name().to_string();
        self.append(
            name,
            OperatorKind::FlatMap,
            FunctionSlot::FlatMap(Box::new(function)),
        )
    }

    pub fn key_by(self, function: impl KeyByFunction + 'static, strategy: KeyStrategy) -> Self {
        let name = function.name().to_string();
        self.append(
            name,
            OperatorKind::KeyBy,
            FunctionSlot::KeyBy {
                function: Box::new(function),
                strategy,
            },
        )
    }

    /// Append the built-in tumbling count window.
    pub fn window(self, spec: WindowSpec) -> Self {
        let function = TumblingCountWindow::new(spec);
        let name = WindowFunction::name(&function).to_string();
        self.append(
            name,
            OperatorKind::Window,
            FunctionSlot::Window(Box::new(function)),
        )
    }

    /// Append the built-in running aggregation.
    pub fn aggregate(self, ops: Vec<AggregateOp>) -> Self {
        let function = RunningAggregate::new(ops);
        let name = AggregateFunction::name(&function).to_string();
        self.append(
            name,
            OperatorKind::Aggregate,
            FunctionSlot::Aggregate(Box::new(function)),
        )
    }

    /// Merge another builder's graph into this one and insert a join
    /// operator fed by both chains' last operators: this chain becomes the
    /// join's left input (slot 0), the other its right input (slot 1).
    pub fn connect(
        mut self,
        other: PipelineBuilder<'a>,
        function: impl JoinFunction + 'static,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Some(e) = other.error {
            self.error = Some(e);
            return self;
        }
        let (Some(left), Some(other_last)) = (self.last, other.last) else {
            self.error = Some(SdeError::NotConfigured(
                "both pipelines need a source before they can be joined".to_string(),
            ));
            return self;
        };

        let name = function.name().to_string();
        let capacity = self.engine.config().join_buffer;
        let slot = FunctionSlot::join_with_capacity(Box::new(function), capacity);
        let result = (|| {
            let mapping = self.graph.absorb(other.graph)?;
            let right = mapping.get(&other_last).copied().ok_or_else(|| {
                SdeError::Fatal("merged pipeline lost its last operator".to_string())
            })?;
            let join = Operator::new(name, OperatorKind::Join, slot)?;
            let join_id = self.graph.add_operator(join)?;
            self.graph.connect(left, join_id)?;
            self.graph.connect(right, join_id)?;
            Ok(join_id)
        })();
        match result {
            Ok(join_id) => self.last = Some(join_id),
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Append a sink and finalize the graph: seal it and validate it.
    pub fn sink(self, function: impl SinkFunction + 'static) -> Self {
        let name = function.name().to_string();
        let mut this = self.append(
            name,
            OperatorKind::Sink,
            FunctionSlot::Sink(Box::new(function)),
        );
        if this.error.is_none() {
            this.graph.seal();
            if !this.graph.validate() {
                this.error = Some(SdeError::InvalidGraph(
                    "pipeline failed validation at finalize".to_string(),
                ));
            }
        }
        this
    }

    /// Submit (once) and drive the pipeline to completion.
    pub fn execute(mut self) -> Result<GraphId, SdeError> {
        let id = self.submit()?;
        self.engine.execute(id)?;
        Ok(id)
    }

    /// Submit (once) and start the pipeline on a background thread.
    pub fn execute_async(mut self) -> Result<GraphId, SdeError> {
        let id = self.submit()?;
        self.engine.execute_async(id)?;
        Ok(id)
    }

    /// Submit (once) and immediately request a cooperative stop.
    pub fn stop(mut self) -> Result<GraphState, SdeError> {
        let id = self.submit()?;
        Ok(self.engine.stop(id))
    }

    /// Register the graph with the engine exactly once, caching the
    /// assigned id for the remaining terminal calls.
    fn submit(&mut self) -> Result<GraphId, SdeError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        if let Some(id) = self.graph_id {
            return Ok(id);
        }
        let graph = std::mem::take(&mut self.graph);
        let id = self.engine.submit(graph)?;
        self.graph_id = Some(id);
        Ok(id)
    }

    fn append(mut self, name: String, kind: OperatorKind, slot: FunctionSlot) -> Self {
        if self.error.is_some() {
            return self;
        }
        let Some(previous) = self.last else {
            self.error = Some(SdeError::NotConfigured(format!(
                "cannot append {kind} operator `{name}`: the pipeline has no source yet"
            )));
            return self;
        };
        let result = Operator::new(name, kind, slot)
            .and_then(|op| self.graph.add_operator(op))
            .and_then(|id| self.graph.connect(previous, id).map(|()| id));
        match result {
            Ok(id) => self.last = Some(id),
            Err(e) => self.error = Some(e),
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sde_core::{FunctionError, FunctionResponse, SchedulingMode};

    struct EmptySource;

    impl SourceFunction for EmptySource {
        fn name(&self) -> &str {
            "empty-source"
        }

        fn execute(&mut self, _input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
            Ok(FunctionResponse::new())
        }

        fn has_next(&self) -> bool {
            false
        }
    }

    struct Identity;

    impl MapFunction for Identity {
        fn name(&self) -> &str {
            "identity"
        }

        fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
            Ok(input)
        }
    }

    struct Devour;

    impl SinkFunction for Devour {
        fn name(&self) -> &str {
            "devour"
        }

        fn execute(&mut self, _input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
            Ok(FunctionResponse::new())
        }
    }

    #[test]
    fn chain_builds_and_executes() {
        let engine = StreamEngine::new(SchedulingMode::SingleThreaded);
        let id = engine
            .pipeline()
            .from_source(EmptySource)
            .map(Identity)
            .sink(Devour)
            .execute()
            .unwrap();
        assert_eq!(engine.state(id), GraphState::Completed);
    }

    #[test]
    fn map_before_source_is_not_configured() {
        let engine = StreamEngine::new(SchedulingMode::SingleThreaded);
        let err = engine.pipeline().map(Identity).execute().unwrap_err();
        assert!(matches!(err, SdeError::NotConfigured(_)));
    }

    #[test]
    fn join_without_sources_is_not_configured() {
        let engine = StreamEngine::new(SchedulingMode::SingleThreaded);
        struct NeverJoin;
        impl JoinFunction for NeverJoin {
            fn name(&self) -> &str {
                "never"
            }
            fn execute_pair(
                &mut self,
                _left: FunctionResponse,
                _right: FunctionResponse,
            ) -> Result<FunctionResponse, FunctionError> {
                Ok(FunctionResponse::new())
            }
        }
        let other = engine.pipeline();
        let err = engine
            .pipeline()
            .connect(other, NeverJoin)
            .execute()
            .unwrap_err();
        assert!(matches!(err, SdeError::NotConfigured(_)));
    }

    #[test]
    fn deferred_error_sticks_through_later_steps() {
        let engine = StreamEngine::new(SchedulingMode::SingleThreaded);
        let err = engine
            .pipeline()
            .map(Identity)
            .sink(Devour)
            .execute()
            .unwrap_err();
        assert!(matches!(err, SdeError::NotConfigured(_)));
    }
}
