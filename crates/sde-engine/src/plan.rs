//! Execution plan: the per-run view of a validated graph.
//!
//! Built once per `execute` and shared by all three drivers. The plan
//! resolves the graph's edge sequence into a dense edge list with input
//! slots, plus per-operator incoming/outgoing edge indices and the
//! topological order to drive in.

use sde_core::{ExecutionGraph, OperatorHandle, OperatorId, SdeError};
use std::collections::HashMap;
use tracing::debug;

/// One directed edge, resolved for execution.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PlannedEdge {
    pub from: OperatorId,
    pub to: OperatorId,
    /// Position of this edge among `to`'s incoming edges, in connection
    /// order. This is the `slot` passed to `Operator::process`.
    pub slot: usize,
}

pub(crate) struct ExecutionPlan {
    /// Topological order over every operator.
    pub order: Vec<OperatorId>,
    /// Dense edge list in connection order.
    pub edges: Vec<PlannedEdge>,
    /// Edge indices entering each operator, in slot order.
    pub incoming: HashMap<OperatorId, Vec<usize>>,
    /// Edge indices leaving each operator, in connection order.
    pub outgoing: HashMap<OperatorId, Vec<usize>>,
    /// Operators with no incoming edges, in topological order.
    pub sources: Vec<OperatorId>,
    /// Resolved operator handles.
    pub handles: HashMap<OperatorId, OperatorHandle>,
}

pub(crate) fn build(graph: &ExecutionGraph) -> Result<ExecutionPlan, SdeError> {
    let order = graph.topological_order();
    if order.is_empty() && !graph.is_empty() {
        return Err(SdeError::InvalidGraph(
            "graph contains a cycle".to_string(),
        ));
    }

    let mut handles = HashMap::with_capacity(order.len());
    let mut incoming: HashMap<OperatorId, Vec<usize>> = HashMap::with_capacity(order.len());
    let mut outgoing: HashMap<OperatorId, Vec<usize>> = HashMap::with_capacity(order.len());
    for &id in &order {
        let handle = graph.operator(id).ok_or_else(|| {
            SdeError::Fatal(format!("operator {id} is missing from the graph registry"))
        })?;
        handles.insert(id, handle);
        incoming.insert(id, Vec::new());
        outgoing.insert(id, Vec::new());
    }

    let mut edges = Vec::with_capacity(graph.edges().len());
    for &(from, to) in graph.edges() {
        let (Some(_), Some(_)) = (incoming.get(&to), outgoing.get(&from)) else {
            return Err(SdeError::Fatal(format!(
                "edge ({from}, {to}) references an operator missing from the adjacency maps"
            )));
        };
        let index = edges.len();
        let slot = incoming
            .get(&to)
            .map(Vec::len)
            .unwrap_or_default();
        edges.push(PlannedEdge { from, to, slot });
        if let Some(list) = incoming.get_mut(&to) {
            list.push(index);
        }
        if let Some(list) = outgoing.get_mut(&from) {
            list.push(index);
        }
    }

    for edge in &edges {
        debug!(from = edge.from, to = edge.to, slot = edge.slot, "planned edge");
    }

    let sources = order
        .iter()
        .filter(|id| incoming.get(*id).is_some_and(Vec::is_empty))
        .copied()
        .collect();

    Ok(ExecutionPlan {
        order,
        edges,
        incoming,
        outgoing,
        sources,
        handles,
    })
}
