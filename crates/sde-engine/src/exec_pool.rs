//! Pooled driver: a fixed set of worker threads with work stealing.
//!
//! Every operator is a unit of work, runnable whenever one of its incoming
//! edges is non-empty (or, for a source, while `has_next()` holds). Any
//! idle worker may claim any runnable operator; a per-operator scheduled
//! flag guarantees at most one worker executes a given operator at a time.
//! Edge buffers are lock-protected FIFO queues, so per-edge ordering is
//! push order; there is no cross-edge ordering guarantee.
//!
//! Termination: no live source, no buffered record, no running claim, and
//! an empty ready queue. The worker that makes the condition true raises
//! the `done` flag and wakes everyone.

use crate::engine::{lock_operator, lock_poison_tolerant, EngineInner, GraphSlot};
use crate::plan::ExecutionPlan;
use sde_core::{FunctionResponse, Message, OperatorId, SdeError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// How long an idle worker sleeps before re-checking the cancellation
/// token. Keeps stop latency bounded without busy-waiting.
const IDLE_WAIT: Duration = Duration::from_millis(20);

struct PoolShared<'p> {
    plan: &'p ExecutionPlan,
    cancel: &'p CancellationToken,
    processed: &'p AtomicU64,
    queues: Vec<Mutex<VecDeque<Message>>>,
    ready: Mutex<VecDeque<OperatorId>>,
    ready_cv: Condvar,
    /// Claim flag per operator: set while queued or executing.
    scheduled: HashMap<OperatorId, AtomicBool>,
    /// Latch per source: set once the source is exhausted.
    retired: HashMap<OperatorId, AtomicBool>,
    live_sources: AtomicUsize,
    buffered: AtomicUsize,
    running: AtomicUsize,
    done: AtomicBool,
}

impl<'p> PoolShared<'p> {
    fn schedule(&self, id: OperatorId) {
        if let Some(flag) = self.scheduled.get(&id) {
            if !flag.swap(true, Ordering::AcqRel) {
                lock_poison_tolerant(&self.ready).push_back(id);
                self.ready_cv.notify_one();
            }
        }
    }

    fn retire_source(&self, id: OperatorId) {
        if let Some(flag) = self.retired.get(&id) {
            if !flag.swap(true, Ordering::AcqRel) {
                self.live_sources.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    fn finish(&self) {
        self.done.store(true, Ordering::Release);
        self.ready_cv.notify_all();
    }

    fn maybe_finish(&self) {
        if self.live_sources.load(Ordering::Acquire) == 0
            && self.buffered.load(Ordering::Acquire) == 0
            && self.running.load(Ordering::Acquire) == 0
            && lock_poison_tolerant(&self.ready).is_empty()
        {
            self.finish();
        }
    }
}

pub(crate) fn run(
    inner: &EngineInner,
    slot: &GraphSlot,
    plan: &ExecutionPlan,
) -> Result<(), SdeError> {
    if plan.sources.is_empty() {
        // Nothing can ever produce a record.
        return Ok(());
    }

    let shared = PoolShared {
        plan,
        cancel: &slot.cancel,
        processed: &inner.processed,
        queues: plan.edges.iter().map(|_| Mutex::new(VecDeque::new())).collect(),
        ready: Mutex::new(VecDeque::new()),
        ready_cv: Condvar::new(),
        scheduled: plan
            .order
            .iter()
            .map(|&id| (id, AtomicBool::new(false)))
            .collect(),
        retired: plan
            .sources
            .iter()
            .map(|&id| (id, AtomicBool::new(false)))
            .collect(),
        live_sources: AtomicUsize::new(plan.sources.len()),
        buffered: AtomicUsize::new(0),
        running: AtomicUsize::new(0),
        done: AtomicBool::new(false),
    };

    for &source in &plan.sources {
        shared.schedule(source);
    }

    let workers = inner.config.workers.max(1);
    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| worker(&shared));
        }
    });

    Ok(())
}

fn worker(shared: &PoolShared<'_>) {
    loop {
        let id = {
            let mut ready = lock_poison_tolerant(&shared.ready);
            loop {
                if shared.done.load(Ordering::Acquire) {
                    return;
                }
                if shared.cancel.is_cancelled() {
                    drop(ready);
                    shared.finish();
                    return;
                }
                if let Some(id) = ready.pop_front() {
                    break id;
                }
                let (guard, _timed_out) = shared
                    .ready_cv
                    .wait_timeout(ready, IDLE_WAIT)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                ready = guard;
            }
        };

        shared.running.fetch_add(1, Ordering::AcqRel);
        let is_source = shared.plan.incoming[&id].is_empty();

        if is_source {
            run_source(shared, id);
        } else {
            drain_operator(shared, id);
        }

        // Release the claim, then re-check for work that arrived while the
        // flag was still set.
        if let Some(flag) = shared.scheduled.get(&id) {
            flag.store(false, Ordering::Release);
        }
        if is_source {
            let more = !shared.cancel.is_cancelled()
                && lock_operator(&shared.plan.handles[&id]).has_next();
            if more {
                shared.schedule(id);
            } else {
                shared.retire_source(id);
            }
        } else {
            let pending = shared.plan.incoming[&id]
                .iter()
                .any(|&edge| !lock_poison_tolerant(&shared.queues[edge]).is_empty());
            if pending {
                shared.schedule(id);
            }
        }

        shared.running.fetch_sub(1, Ordering::AcqRel);
        shared.maybe_finish();
    }
}

/// One source invocation per claim, so a long-lived source interleaves
/// fairly with the rest of the pool.
fn run_source(shared: &PoolShared<'_>, id: OperatorId) {
    let mut out = FunctionResponse::new();
    {
        let mut operator = lock_operator(&shared.plan.handles[&id]);
        if !operator.has_next() {
            return;
        }
        operator.process(None, 0, &mut out);
    }
    shared.processed.fetch_add(out.len() as u64, Ordering::Relaxed);
    route(shared, id, out);
}

/// Drain every available record on every incoming edge of the claimed
/// operator, FIFO per edge.
fn drain_operator(shared: &PoolShared<'_>, id: OperatorId) {
    let mut operator = lock_operator(&shared.plan.handles[&id]);
    for &edge in &shared.plan.incoming[&id] {
        let input_slot = shared.plan.edges[edge].slot;
        loop {
            if shared.cancel.is_cancelled() {
                return;
            }
            let message = lock_poison_tolerant(&shared.queues[edge]).pop_front();
            let Some(message) = message else {
                break;
            };
            shared.buffered.fetch_sub(1, Ordering::AcqRel);
            let mut out = FunctionResponse::new();
            operator.process(Some(message), input_slot, &mut out);
            route(shared, id, out);
        }
    }
}

fn route(shared: &PoolShared<'_>, from: OperatorId, out: FunctionResponse) {
    let outgoing = &shared.plan.outgoing[&from];
    for message in out {
        match outgoing.split_first() {
            None => {
                trace!(operator = from, id = message.id(), "emission without outgoing edge dropped");
            }
            Some((&first, rest)) => {
                for &edge in rest {
                    push(shared, edge, message.fork());
                }
                push(shared, first, message);
            }
        }
    }
}

fn push(shared: &PoolShared<'_>, edge: usize, message: Message) {
    // Count before publishing: a consumer may pop (and decrement) the
    // instant the record lands in the queue.
    shared.buffered.fetch_add(1, Ordering::AcqRel);
    lock_poison_tolerant(&shared.queues[edge]).push_back(message);
    shared.schedule(shared.plan.edges[edge].to);
}
