//! The stream engine: graph submission, lifecycle, and the drive loop.

use crate::plan;
use crate::{exec_async, exec_pool, exec_single};
use sde_core::{
    ExecutionGraph, Operator, OperatorHandle, OperatorId, OperatorStats, SchedulingMode, SdeError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Engine-assigned identifier of a submitted graph.
pub type GraphId = u64;

/// Lifecycle state of a submitted graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Unknown,
    Submitted,
    Running,
    Completed,
    Stopped,
    Error,
}

/// Tunables fixed at engine construction.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub mode: SchedulingMode,
    /// Worker thread count for the pooled mode.
    pub workers: usize,
    /// Per-edge channel capacity for the async mode.
    pub channel_capacity: usize,
    /// Per-side buffer capacity of join operators built by the builder.
    pub join_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: SchedulingMode::SingleThreaded,
            workers: 4,
            channel_capacity: 64,
            join_buffer: 1024,
        }
    }
}

/// Per-graph record owned by the engine.
pub(crate) struct GraphSlot {
    pub(crate) graph: ExecutionGraph,
    state: Mutex<GraphState>,
    pub(crate) cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GraphSlot {
    fn new(graph: ExecutionGraph) -> Self {
        Self {
            graph,
            state: Mutex::new(GraphState::Submitted),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> GraphState {
        *lock_poison_tolerant(&self.state)
    }

    fn set_state(&self, state: GraphState) {
        *lock_poison_tolerant(&self.state) = state;
    }

    /// Transition `from` -> `to` only if the slot is still in `from`.
    fn transition(&self, from: GraphState, to: GraphState) -> bool {
        let mut guard = lock_poison_tolerant(&self.state);
        if *guard == from {
            *guard = to;
            true
        } else {
            false
        }
    }
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    graphs: Mutex<HashMap<GraphId, Arc<GraphSlot>>>,
    next_graph_id: AtomicU64,
    pub(crate) processed: AtomicU64,
    epoch: Mutex<Instant>,
}

/// Owns submitted graphs and drives them under the scheduling mode chosen
/// at construction.
///
/// Engines are independent: each has its own graph-id space, operator-id
/// spaces (per graph), and counters. The handle is cheap to clone and
/// thread-safe; `execute_async` and `stop` may be called from different
/// threads.
#[derive(Clone)]
pub struct StreamEngine {
    inner: Arc<EngineInner>,
}

impl StreamEngine {
    pub fn new(mode: SchedulingMode) -> Self {
        Self::with_config(EngineConfig {
            mode,
            ..EngineConfig::default()
        })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                graphs: Mutex::new(HashMap::new()),
                next_graph_id: AtomicU64::new(1),
                processed: AtomicU64::new(0),
                epoch: Mutex::new(Instant::now()),
            }),
        }
    }

    pub fn mode(&self) -> SchedulingMode {
        self.inner.config.mode
    }

    pub(crate) fn config(&self) -> EngineConfig {
        self.inner.config
    }

    /// Start a fluent pipeline chain against this engine.
    pub fn pipeline(&self) -> crate::PipelineBuilder<'_> {
        crate::PipelineBuilder::new(self)
    }

    /// Validate and register a graph. The graph is sealed on acceptance.
    pub fn submit(&self, mut graph: ExecutionGraph) -> Result<GraphId, SdeError> {
        if !graph.validate() {
            return Err(SdeError::InvalidGraph(
                "graph failed validation: cycle or inconsistent adjacency".to_string(),
            ));
        }
        graph.seal();
        let id = self.inner.next_graph_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(GraphSlot::new(graph));
        info!(graph = id, operators = slot.graph.len(), "graph submitted");
        lock_poison_tolerant(&self.inner.graphs).insert(id, slot);
        Ok(id)
    }

    fn slot(&self, id: GraphId) -> Option<Arc<GraphSlot>> {
        lock_poison_tolerant(&self.inner.graphs).get(&id).cloned()
    }

    /// Current lifecycle state; `Unknown` for unregistered ids.
    pub fn state(&self, id: GraphId) -> GraphState {
        self.slot(id).map_or(GraphState::Unknown, |slot| slot.state())
    }

    /// Drive the graph to completion on the calling thread.
    pub fn execute(&self, id: GraphId) -> Result<(), SdeError> {
        let slot = self
            .slot(id)
            .ok_or_else(|| SdeError::InvalidGraph(format!("unknown graph id {id}")))?;
        drive(&self.inner, id, &slot)
    }

    /// Start the drive on a background thread and return immediately.
    pub fn execute_async(&self, id: GraphId) -> Result<(), SdeError> {
        let slot = self
            .slot(id)
            .ok_or_else(|| SdeError::InvalidGraph(format!("unknown graph id {id}")))?;
        let inner = self.inner.clone();
        let thread_slot = slot.clone();
        let handle = std::thread::Builder::new()
            .name(format!("sde-graph-{id}"))
            .spawn(move || {
                if let Err(e) = drive(&inner, id, &thread_slot) {
                    error!(graph = id, error = %e, "asynchronous execution failed");
                }
            })
            .map_err(|e| SdeError::Other(e.into()))?;
        *lock_poison_tolerant(&slot.handle) = Some(handle);
        Ok(())
    }

    /// Block until a pending asynchronous execution finishes, then return
    /// the final state. A no-op for graphs with no background drive.
    pub fn wait(&self, id: GraphId) -> GraphState {
        let Some(slot) = self.slot(id) else {
            return GraphState::Unknown;
        };
        let handle = lock_poison_tolerant(&slot.handle).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(graph = id, "execution thread panicked");
                slot.set_state(GraphState::Error);
            }
        }
        slot.state()
    }

    /// Cooperatively stop a graph.
    ///
    /// The drive loop observes the cancellation at the next operator
    /// boundary; no in-flight `process` is aborted. `close` still runs on
    /// every operator, and any background drive is joined before this
    /// returns, so counters are stable afterwards. Stopping a graph that is
    /// already `Completed`, `Stopped`, or `Error` is a no-op that returns
    /// the state unchanged. Never an error.
    pub fn stop(&self, id: GraphId) -> GraphState {
        let Some(slot) = self.slot(id) else {
            return GraphState::Unknown;
        };
        let current = slot.state();
        match current {
            GraphState::Running | GraphState::Submitted => {
                slot.set_state(GraphState::Stopped);
                slot.cancel.cancel();
                info!(graph = id, "stop requested");
                let handle = lock_poison_tolerant(&slot.handle).take();
                if let Some(handle) = handle {
                    if handle.thread().id() != std::thread::current().id()
                        && handle.join().is_err()
                    {
                        error!(graph = id, "execution thread panicked during stop");
                        slot.set_state(GraphState::Error);
                    }
                }
                slot.state()
            }
            other => other,
        }
    }

    /// Stop (if needed) and erase a graph.
    pub fn remove_graph(&self, id: GraphId) {
        self.stop(id);
        lock_poison_tolerant(&self.inner.graphs).remove(&id);
    }

    /// Counter snapshot for one operator of a submitted graph.
    pub fn operator_stats(&self, graph: GraphId, operator: OperatorId) -> Option<OperatorStats> {
        let slot = self.slot(graph)?;
        let handle = slot.graph.operator(operator)?;
        let stats = lock_operator(&handle).stats();
        Some(stats)
    }

    /// Messages emitted by source operators across all graphs since the
    /// last `reset_metrics`.
    pub fn processed_messages(&self) -> u64 {
        self.inner.processed.load(Ordering::Relaxed)
    }

    /// Processed messages divided by wall-clock seconds since the last
    /// `reset_metrics`.
    pub fn throughput(&self) -> f64 {
        let elapsed = lock_poison_tolerant(&self.inner.epoch).elapsed().as_secs_f64();
        self.processed_messages() as f64 / elapsed.max(f64::EPSILON)
    }

    pub fn reset_metrics(&self) {
        self.inner.processed.store(0, Ordering::Relaxed);
        *lock_poison_tolerant(&self.inner.epoch) = Instant::now();
    }
}

/// The synchronous drive shared by `execute` and `execute_async`.
fn drive(inner: &Arc<EngineInner>, id: GraphId, slot: &Arc<GraphSlot>) -> Result<(), SdeError> {
    {
        let mut state = lock_poison_tolerant(&slot.state);
        match *state {
            GraphState::Submitted => *state = GraphState::Running,
            // Stopped before it ever ran: nothing to do.
            GraphState::Stopped => return Ok(()),
            other => {
                return Err(SdeError::InvalidGraph(format!(
                    "graph {id} is {other:?}, expected Submitted"
                )))
            }
        }
    }
    info!(graph = id, mode = ?inner.config.mode, "execution started");

    let plan = match plan::build(&slot.graph) {
        Ok(plan) => plan,
        Err(e) => {
            slot.set_state(GraphState::Error);
            return Err(e);
        }
    };

    // Open every operator in topological order; on failure, close the ones
    // already opened in reverse order and abort.
    let mut opened: Vec<OperatorId> = Vec::with_capacity(plan.order.len());
    for &op_id in &plan.order {
        let result = lock_operator(&plan.handles[&op_id]).open();
        if let Err(e) = result {
            for &prev in opened.iter().rev() {
                if let Err(close_err) = lock_operator(&plan.handles[&prev]).close() {
                    warn!(graph = id, operator = prev, error = %close_err, "close failed during open rollback");
                }
            }
            slot.set_state(GraphState::Error);
            return Err(e);
        }
        opened.push(op_id);
    }

    let run_result = match inner.config.mode {
        SchedulingMode::SingleThreaded => exec_single::run(inner, slot, &plan),
        SchedulingMode::Pooled => exec_pool::run(inner, slot, &plan),
        SchedulingMode::Async => exec_async::run(inner, slot, &plan),
    };

    // Close in reverse topological order on every exit path.
    let mut close_result: Result<(), SdeError> = Ok(());
    for &op_id in plan.order.iter().rev() {
        if let Err(e) = lock_operator(&plan.handles[&op_id]).close() {
            warn!(graph = id, operator = op_id, error = %e, "operator close failed");
            if close_result.is_ok() {
                close_result = Err(e);
            }
        }
    }

    match run_result.and(close_result) {
        Ok(()) => {
            // A cooperative stop already moved the state to Stopped; only a
            // still-running graph completes.
            if slot.transition(GraphState::Running, GraphState::Completed) {
                info!(graph = id, "execution completed");
            }
            Ok(())
        }
        Err(e) => {
            slot.set_state(GraphState::Error);
            error!(graph = id, error = %e, "execution failed");
            Err(e)
        }
    }
}

/// Ignore mutex poisoning: a panic inside a lock holder must not wedge the
/// engine's cleanup paths.
pub(crate) fn lock_poison_tolerant<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Lock a shared operator handle.
pub(crate) fn lock_operator(handle: &OperatorHandle) -> MutexGuard<'_, Operator> {
    handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_graph_state_is_unknown() {
        let engine = StreamEngine::new(SchedulingMode::SingleThreaded);
        assert_eq!(engine.state(77), GraphState::Unknown);
        assert_eq!(engine.stop(77), GraphState::Unknown);
    }

    #[test]
    fn empty_graph_completes() {
        let engine = StreamEngine::new(SchedulingMode::SingleThreaded);
        let id = engine.submit(ExecutionGraph::new()).unwrap();
        assert_eq!(engine.state(id), GraphState::Submitted);
        engine.execute(id).unwrap();
        assert_eq!(engine.state(id), GraphState::Completed);
    }

    #[test]
    fn cyclic_graph_is_rejected_at_submit() {
        let mut graph = ExecutionGraph::new();
        let a = graph
            .add_operator(Operator::unconfigured("a", sde_core::OperatorKind::Map))
            .unwrap();
        let b = graph
            .add_operator(Operator::unconfigured("b", sde_core::OperatorKind::Map))
            .unwrap();
        graph.connect(a, b).unwrap();
        graph.connect(b, a).unwrap();

        let engine = StreamEngine::new(SchedulingMode::SingleThreaded);
        assert!(matches!(
            engine.submit(graph),
            Err(SdeError::InvalidGraph(_))
        ));
    }

    #[test]
    fn double_execute_is_rejected() {
        let engine = StreamEngine::new(SchedulingMode::SingleThreaded);
        let id = engine.submit(ExecutionGraph::new()).unwrap();
        engine.execute(id).unwrap();
        assert!(matches!(
            engine.execute(id),
            Err(SdeError::InvalidGraph(_))
        ));
    }

    #[test]
    fn stop_is_idempotent_after_completion() {
        let engine = StreamEngine::new(SchedulingMode::SingleThreaded);
        let id = engine.submit(ExecutionGraph::new()).unwrap();
        engine.execute(id).unwrap();
        assert_eq!(engine.stop(id), GraphState::Completed);
        assert_eq!(engine.stop(id), GraphState::Completed);
    }

    #[test]
    fn remove_graph_forgets_the_id() {
        let engine = StreamEngine::new(SchedulingMode::SingleThreaded);
        let id = engine.submit(ExecutionGraph::new()).unwrap();
        engine.remove_graph(id);
        assert_eq!(engine.state(id), GraphState::Unknown);
    }

    #[test]
    fn reset_metrics_zeroes_the_counter() {
        let engine = StreamEngine::new(SchedulingMode::SingleThreaded);
        engine.inner.processed.store(10, Ordering::Relaxed);
        assert_eq!(engine.processed_messages(), 10);
        engine.reset_metrics();
        assert_eq!(engine.processed_messages(), 0);
    }
}
