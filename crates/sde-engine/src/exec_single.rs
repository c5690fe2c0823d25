//! Single-threaded driver: the drive loop runs on the caller's thread.
//!
//! Edge buffers are plain queues and operator invocations are strictly
//! sequential in topological order, so no synchronisation is needed beyond
//! the shared operator handles. Each round drives every live source once,
//! then drains every non-source operator edge by edge, FIFO per edge. The
//! loop ends when no source reports `has_next()` and every edge is empty,
//! or when a cooperative stop is observed at an operator boundary.

use crate::engine::{lock_operator, EngineInner, GraphSlot};
use crate::plan::ExecutionPlan;
use sde_core::{FunctionResponse, Message, OperatorId, SdeError};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use tracing::trace;

pub(crate) fn run(
    inner: &EngineInner,
    slot: &GraphSlot,
    plan: &ExecutionPlan,
) -> Result<(), SdeError> {
    let cancel = &slot.cancel;
    let mut queues: Vec<VecDeque<Message>> = plan.edges.iter().map(|_| VecDeque::new()).collect();

    'drive: loop {
        if cancel.is_cancelled() {
            break;
        }

        let mut alive = false;
        for &source in &plan.sources {
            if cancel.is_cancelled() {
                break 'drive;
            }
            let mut out = FunctionResponse::new();
            {
                let mut operator = lock_operator(&plan.handles[&source]);
                if !operator.has_next() {
                    continue;
                }
                alive = true;
                operator.process(None, 0, &mut out);
            }
            inner.processed.fetch_add(out.len() as u64, Ordering::Relaxed);
            route(source, out, plan, &mut queues);
        }

        // One pass in topological order fully drains the graph: records
        // only ever move forward along edges.
        for &id in &plan.order {
            let incoming = &plan.incoming[&id];
            if incoming.is_empty() {
                continue;
            }
            for &edge in incoming {
                let input_slot = plan.edges[edge].slot;
                loop {
                    if cancel.is_cancelled() {
                        break 'drive;
                    }
                    let Some(message) = queues[edge].pop_front() else {
                        break;
                    };
                    let mut out = FunctionResponse::new();
                    lock_operator(&plan.handles[&id]).process(Some(message), input_slot, &mut out);
                    route(id, out, plan, &mut queues);
                }
            }
        }

        if !alive {
            break;
        }
    }

    Ok(())
}

/// Broadcast every emitted message along each outgoing edge: the first
/// edge receives the original, the rest receive same-id forks.
fn route(
    from: OperatorId,
    out: FunctionResponse,
    plan: &ExecutionPlan,
    queues: &mut [VecDeque<Message>],
) {
    let outgoing = &plan.outgoing[&from];
    for message in out {
        match outgoing.split_first() {
            None => {
                trace!(operator = from, id = message.id(), "emission without outgoing edge dropped");
            }
            Some((&first, rest)) => {
                for &edge in rest {
                    queues[edge].push_back(message.fork());
                }
                queues[first].push_back(message);
            }
        }
    }
}
