//! Async driver: a cooperative single-threaded runtime.
//!
//! Each operator becomes a task on a current-thread tokio runtime owned by
//! the call; each edge becomes a bounded mpsc channel. A task suspends
//! when its incoming edges are empty and resumes when a record arrives;
//! suspension points occur only between operator invocations, never inside
//! `function.execute`. Source exhaustion drops the upstream senders, and
//! the channel-close cascade shuts the graph down task by task.

use crate::engine::{lock_operator, EngineInner, GraphSlot};
use crate::plan::ExecutionPlan;
use sde_core::{FunctionResponse, Message, OperatorHandle, SdeError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub(crate) fn run(
    inner: &Arc<EngineInner>,
    slot: &Arc<GraphSlot>,
    plan: &ExecutionPlan,
) -> Result<(), SdeError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|e| SdeError::Other(e.into()))?;

    let capacity = inner.config.channel_capacity.max(1);

    // Wire one channel per edge. Each edge has exactly one producer and
    // one consumer, claimed below while assembling the per-operator task
    // endpoints.
    let mut senders: Vec<Option<mpsc::Sender<Message>>> = Vec::with_capacity(plan.edges.len());
    let mut receivers: Vec<Option<mpsc::Receiver<Message>>> =
        Vec::with_capacity(plan.edges.len());
    for _ in &plan.edges {
        let (tx, rx) = mpsc::channel(capacity);
        senders.push(Some(tx));
        receivers.push(Some(rx));
    }

    struct TaskSpec {
        handle: OperatorHandle,
        inputs: Vec<(usize, mpsc::Receiver<Message>)>,
        outputs: Vec<mpsc::Sender<Message>>,
    }

    let mut specs = Vec::with_capacity(plan.order.len());
    for &id in &plan.order {
        let mut outputs = Vec::new();
        for &edge in &plan.outgoing[&id] {
            match senders[edge].take() {
                Some(tx) => outputs.push(tx),
                None => {
                    return Err(SdeError::Fatal(format!(
                        "edge {edge} sender claimed by more than one operator"
                    )))
                }
            }
        }
        let mut inputs = Vec::new();
        for &edge in &plan.incoming[&id] {
            match receivers[edge].take() {
                Some(rx) => inputs.push((plan.edges[edge].slot, rx)),
                None => {
                    return Err(SdeError::Fatal(format!(
                        "edge {edge} receiver claimed by more than one operator"
                    )))
                }
            }
        }
        let handle = plan.handles[&id].clone();
        specs.push(TaskSpec {
            handle,
            inputs,
            outputs,
        });
    }

    runtime.block_on(async {
        let mut tasks = Vec::with_capacity(specs.len());
        for spec in specs {
            let cancel = slot.cancel.clone();
            if spec.inputs.is_empty() {
                let inner = inner.clone();
                tasks.push(tokio::spawn(source_task(
                    spec.handle,
                    spec.outputs,
                    cancel,
                    inner,
                )));
            } else {
                tasks.push(tokio::spawn(operator_task(
                    spec.handle,
                    spec.inputs,
                    spec.outputs,
                    cancel,
                )));
            }
        }
        for task in tasks {
            if task.await.is_err() {
                trace!("operator task aborted");
            }
        }
    });

    Ok(())
}

async fn source_task(
    handle: OperatorHandle,
    outputs: Vec<mpsc::Sender<Message>>,
    cancel: CancellationToken,
    inner: Arc<EngineInner>,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let mut out = FunctionResponse::new();
        {
            let mut operator = lock_operator(&handle);
            if !operator.has_next() {
                break;
            }
            operator.process(None, 0, &mut out);
        }
        inner.processed.fetch_add(out.len() as u64, Ordering::Relaxed);
        if !deliver(out, &outputs, &cancel).await {
            break;
        }
        // Explicit suspension point between invocations.
        tokio::task::yield_now().await;
    }
    // Dropping the senders lets downstream tasks run dry and exit.
}

async fn operator_task(
    handle: OperatorHandle,
    inputs: Vec<(usize, mpsc::Receiver<Message>)>,
    outputs: Vec<mpsc::Sender<Message>>,
    cancel: CancellationToken,
) {
    let mut streams = StreamMap::new();
    for (input_slot, receiver) in inputs {
        streams.insert(input_slot, ReceiverStream::new(receiver));
    }
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => None,
            item = streams.next() => item,
        };
        let Some((input_slot, message)) = next else {
            break;
        };
        let mut out = FunctionResponse::new();
        {
            lock_operator(&handle).process(Some(message), input_slot, &mut out);
        }
        if !deliver(out, &outputs, &cancel).await {
            break;
        }
    }
}

/// Broadcast emissions along every outgoing channel; same-id forks feed
/// the extra edges. Returns `false` when the task should wind down
/// (cancellation, or every consumer is gone).
async fn deliver(
    out: FunctionResponse,
    outputs: &[mpsc::Sender<Message>],
    cancel: &CancellationToken,
) -> bool {
    for message in out {
        let Some((first, rest)) = outputs.split_first() else {
            trace!(id = message.id(), "emission without outgoing edge dropped");
            continue;
        };
        for sender in rest {
            let copy = message.fork();
            tokio::select! {
                _ = cancel.cancelled() => return false,
                sent = sender.send(copy) => {
                    if sent.is_err() {
                        return false;
                    }
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            sent = first.send(message) => {
                if sent.is_err() {
                    return false;
                }
            }
        }
    }
    true
}
