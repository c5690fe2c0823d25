//! The execution graph: a DAG of operators with dual adjacency.
//!
//! The graph owns its operators. External handles are [`OperatorId`]s; the
//! id-to-operator lookup is the only way to dereference one. Operators are
//! stored behind `Arc<Mutex<_>>` so that the pooled and async execution
//! drivers can share them across workers — ownership still rests with the
//! graph.

use crate::error::SdeError;
use crate::operator::{Operator, OperatorId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Shared handle to a registered operator.
pub type OperatorHandle = Arc<Mutex<Operator>>;

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    Unvisited,
    OnStack,
    Done,
}

/// DAG registry: operators as nodes, ordered multi-edges, forward and
/// reverse adjacency kept as exact transposes of each other.
///
/// Edge insertion order is authoritative: an operator's input slots are
/// the positions of its incoming edges in connection order, and fan-out
/// delivery walks outgoing edges in connection order.
#[derive(Debug, Default)]
pub struct ExecutionGraph {
    next_id: OperatorId,
    operators: BTreeMap<OperatorId, OperatorHandle>,
    forward: BTreeMap<OperatorId, Vec<OperatorId>>,
    reverse: BTreeMap<OperatorId, Vec<OperatorId>>,
    edge_seq: Vec<(OperatorId, OperatorId)>,
    sealed: bool,
}

impl ExecutionGraph {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Register an operator, assigning the next sequential id.
    pub fn add_operator(&mut self, mut operator: Operator) -> Result<OperatorId, SdeError> {
        self.ensure_mutable()?;
        // next_id starts at 1; a default-constructed graph starts at 0 and
        // hands out ids from 1 as well.
        if self.next_id == 0 {
            self.next_id = 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        operator.assign_id(id);
        self.operators.insert(id, Arc::new(Mutex::new(operator)));
        self.forward.insert(id, Vec::new());
        self.reverse.insert(id, Vec::new());
        Ok(id)
    }

    /// Connect two registered operators.
    ///
    /// Only endpoint existence is checked here; duplicates are allowed and
    /// model replicated fan-out (multi-edges). Cycle detection happens in
    /// [`validate`](Self::validate).
    pub fn connect(&mut self, source: OperatorId, target: OperatorId) -> Result<(), SdeError> {
        self.ensure_mutable()?;
        if !self.operators.contains_key(&source) {
            return Err(SdeError::InvalidGraph(format!(
                "edge source operator {source} does not exist"
            )));
        }
        if !self.operators.contains_key(&target) {
            return Err(SdeError::InvalidGraph(format!(
                "edge target operator {target} does not exist"
            )));
        }
        if let Some(list) = self.forward.get_mut(&source) {
            list.push(target);
        }
        if let Some(list) = self.reverse.get_mut(&target) {
            list.push(source);
        }
        self.edge_seq.push((source, target));
        Ok(())
    }

    /// Erase an operator and scrub every occurrence of it from every
    /// adjacency list, forward and reverse.
    pub fn remove_operator(&mut self, id: OperatorId) -> Result<(), SdeError> {
        self.ensure_mutable()?;
        if self.operators.remove(&id).is_none() {
            return Err(SdeError::InvalidGraph(format!(
                "operator {id} does not exist"
            )));
        }
        self.forward.remove(&id);
        self.reverse.remove(&id);
        for list in self.forward.values_mut() {
            list.retain(|&other| other != id);
        }
        for list in self.reverse.values_mut() {
            list.retain(|&other| other != id);
        }
        self.edge_seq
            .retain(|&(from, to)| from != id && to != id);
        Ok(())
    }

    /// Look up an operator handle by id.
    pub fn operator(&self, id: OperatorId) -> Option<OperatorHandle> {
        self.operators.get(&id).cloned()
    }

    /// Registered ids, ascending.
    pub fn operator_ids(&self) -> Vec<OperatorId> {
        self.operators.keys().copied().collect()
    }

    /// Edges in connection order. An operator's n-th incoming edge in this
    /// sequence is its input slot n.
    pub fn edges(&self) -> &[(OperatorId, OperatorId)] {
        &self.edge_seq
    }

    /// Read-only view of an operator's successors, in connection order.
    pub fn successors(&self, id: OperatorId) -> &[OperatorId] {
        self.forward.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Read-only view of an operator's predecessors, in connection order.
    pub fn predecessors(&self, id: OperatorId) -> &[OperatorId] {
        self.reverse.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Operators with no predecessors, ascending by id.
    pub fn sources(&self) -> Vec<OperatorId> {
        self.operators
            .keys()
            .filter(|id| self.predecessors(**id).is_empty())
            .copied()
            .collect()
    }

    /// Operators with no successors, ascending by id.
    pub fn sinks(&self) -> Vec<OperatorId> {
        self.operators
            .keys()
            .filter(|id| self.successors(**id).is_empty())
            .copied()
            .collect()
    }

    /// Deterministic topological order.
    ///
    /// Depth-first post-order, reversed. Successors are visited in the
    /// order they were connected and roots in ascending id order, so the
    /// result is stable for a fixed construction sequence. A back-edge
    /// (cycle) yields the empty vector as a sentinel.
    pub fn topological_order(&self) -> Vec<OperatorId> {
        let mut state: BTreeMap<OperatorId, VisitState> = self
            .operators
            .keys()
            .map(|&id| (id, VisitState::Unvisited))
            .collect();
        let mut post = Vec::with_capacity(self.operators.len());

        for &root in self.operators.keys() {
            if state[&root] != VisitState::Unvisited {
                continue;
            }
            // Iterative DFS: (node, index of the next successor to visit).
            let mut stack: Vec<(OperatorId, usize)> = vec![(root, 0)];
            state.insert(root, VisitState::OnStack);
            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                let cursor = frame.1;
                let successors = self.successors(node);
                if cursor < successors.len() {
                    frame.1 += 1;
                    let next = successors[cursor];
                    match state[&next] {
                        VisitState::Unvisited => {
                            state.insert(next, VisitState::OnStack);
                            stack.push((next, 0));
                        }
                        VisitState::OnStack => return Vec::new(),
                        VisitState::Done => {}
                    }
                } else {
                    state.insert(node, VisitState::Done);
                    post.push(node);
                    stack.pop();
                }
            }
        }

        post.reverse();
        post
    }

    /// `true` iff the graph is empty or acyclic.
    pub fn validate(&self) -> bool {
        self.is_empty() || !self.topological_order().is_empty()
    }

    /// Move every operator and edge of `other` into this graph, assigning
    /// fresh ids. Returns the old-to-new id mapping. Used by the builder's
    /// stream-join merge.
    pub fn absorb(
        &mut self,
        other: ExecutionGraph,
    ) -> Result<BTreeMap<OperatorId, OperatorId>, SdeError> {
        self.ensure_mutable()?;
        let mut mapping = BTreeMap::new();
        let edges = other.edge_seq.clone();
        for (old_id, handle) in other.operators {
            let operator = Arc::try_unwrap(handle)
                .map_err(|_| {
                    SdeError::Fatal("operator is shared outside its owning graph".to_string())
                })?
                .into_inner()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let new_id = self.add_operator(operator)?;
            mapping.insert(old_id, new_id);
        }
        for (from, to) in edges {
            let (Some(&from), Some(&to)) = (mapping.get(&from), mapping.get(&to)) else {
                return Err(SdeError::Fatal(
                    "absorbed edge references an unknown operator".to_string(),
                ));
            };
            self.connect(from, to)?;
        }
        Ok(mapping)
    }

    /// Mark the graph immutable. Later structural mutation is an error.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn ensure_mutable(&self) -> Result<(), SdeError> {
        if self.sealed {
            return Err(SdeError::InvalidGraph(
                "graph is sealed and can no longer be modified".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::OperatorKind;

    fn node(name: &str) -> Operator {
        Operator::unconfigured(name, OperatorKind::Map)
    }

    fn chain(graph: &mut ExecutionGraph, n: usize) -> Vec<OperatorId> {
        let ids: Vec<OperatorId> = (0..n)
            .map(|i| graph.add_operator(node(&format!("op{i}"))).unwrap())
            .collect();
        for pair in ids.windows(2) {
            graph.connect(pair[0], pair[1]).unwrap();
        }
        ids
    }

    #[test]
    fn ids_are_sequential_from_one() {
        let mut graph = ExecutionGraph::new();
        let a = graph.add_operator(node("a")).unwrap();
        let b = graph.add_operator(node("b")).unwrap();
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn adjacency_is_transposed() {
        let mut graph = ExecutionGraph::new();
        let ids = chain(&mut graph, 4);
        graph.connect(ids[0], ids[2]).unwrap();
        for &a in &ids {
            for &b in &ids {
                let forward = graph.successors(a).iter().filter(|&&x| x == b).count();
                let reverse = graph.predecessors(b).iter().filter(|&&x| x == a).count();
                assert_eq!(forward, reverse, "edge ({a}, {b})");
            }
        }
    }

    #[test]
    fn topological_order_respects_edges() {
        let mut graph = ExecutionGraph::new();
        let a = graph.add_operator(node("a")).unwrap();
        let b = graph.add_operator(node("b")).unwrap();
        let c = graph.add_operator(node("c")).unwrap();
        let d = graph.add_operator(node("d")).unwrap();
        graph.connect(a, c).unwrap();
        graph.connect(b, c).unwrap();
        graph.connect(c, d).unwrap();

        let order = graph.topological_order();
        assert_eq!(order.len(), 4);
        let pos = |id: OperatorId| order.iter().position(|&x| x == id).unwrap();
        for &(from, to) in graph.edges() {
            assert!(pos(from) < pos(to), "edge ({from}, {to}) out of order");
        }
    }

    #[test]
    fn topological_order_is_deterministic() {
        let build = || {
            let mut graph = ExecutionGraph::new();
            let a = graph.add_operator(node("a")).unwrap();
            let b = graph.add_operator(node("b")).unwrap();
            let c = graph.add_operator(node("c")).unwrap();
            graph.connect(a, b).unwrap();
            graph.connect(a, c).unwrap();
            graph
        };
        assert_eq!(build().topological_order(), build().topological_order());
    }

    #[test]
    fn cycle_yields_empty_sentinel() {
        let mut graph = ExecutionGraph::new();
        let a = graph.add_operator(node("a")).unwrap();
        let b = graph.add_operator(node("b")).unwrap();
        graph.connect(a, b).unwrap();
        graph.connect(b, a).unwrap();
        assert!(graph.topological_order().is_empty());
        assert!(!graph.validate());
    }

    #[test]
    fn empty_graph_validates() {
        assert!(ExecutionGraph::new().validate());
    }

    #[test]
    fn multi_edges_are_allowed() {
        let mut graph = ExecutionGraph::new();
        let a = graph.add_operator(node("a")).unwrap();
        let b = graph.add_operator(node("b")).unwrap();
        graph.connect(a, b).unwrap();
        graph.connect(a, b).unwrap();
        assert_eq!(graph.successors(a), &[b, b]);
        assert_eq!(graph.predecessors(b), &[a, a]);
        assert!(graph.validate());
    }

    #[test]
    fn connect_rejects_missing_endpoints() {
        let mut graph = ExecutionGraph::new();
        let a = graph.add_operator(node("a")).unwrap();
        assert!(matches!(
            graph.connect(a, 99),
            Err(SdeError::InvalidGraph(_))
        ));
        assert!(matches!(
            graph.connect(99, a),
            Err(SdeError::InvalidGraph(_))
        ));
    }

    #[test]
    fn remove_operator_scrubs_all_lists() {
        let mut graph = ExecutionGraph::new();
        let ids = chain(&mut graph, 3);
        graph.connect(ids[0], ids[2]).unwrap();
        graph.remove_operator(ids[1]).unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.successors(ids[0]), &[ids[2]]);
        assert_eq!(graph.predecessors(ids[2]), &[ids[0]]);
        assert!(graph
            .edges()
            .iter()
            .all(|&(f, t)| f != ids[1] && t != ids[1]));
    }

    #[test]
    fn sources_and_sinks_by_degree() {
        let mut graph = ExecutionGraph::new();
        let ids = chain(&mut graph, 3);
        assert_eq!(graph.sources(), vec![ids[0]]);
        assert_eq!(graph.sinks(), vec![ids[2]]);
    }

    #[test]
    fn sealed_graph_rejects_mutation() {
        let mut graph = ExecutionGraph::new();
        let a = graph.add_operator(node("a")).unwrap();
        graph.seal();
        assert!(matches!(
            graph.add_operator(node("b")),
            Err(SdeError::InvalidGraph(_))
        ));
        assert!(matches!(graph.connect(a, a), Err(SdeError::InvalidGraph(_))));
        assert!(matches!(
            graph.remove_operator(a),
            Err(SdeError::InvalidGraph(_))
        ));
    }

    #[test]
    fn absorb_remaps_operators_and_edges() {
        let mut left = ExecutionGraph::new();
        let l0 = left.add_operator(node("l0")).unwrap();

        let mut right = ExecutionGraph::new();
        let r0 = right.add_operator(node("r0")).unwrap();
        let r1 = right.add_operator(node("r1")).unwrap();
        right.connect(r0, r1).unwrap();

        let mapping = left.absorb(right).unwrap();
        assert_eq!(left.len(), 3);
        let new_r0 = mapping[&r0];
        let new_r1 = mapping[&r1];
        assert_ne!(new_r0, l0);
        assert_eq!(left.successors(new_r0), &[new_r1]);
    }
}
