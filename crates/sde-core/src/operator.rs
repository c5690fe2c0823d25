//! Operators: the flow-control nodes of an execution graph.
//!
//! An operator owns ingress, emission, counters and lifecycle; every
//! record-level decision is delegated to the contained function. The set of
//! operator variants is closed ([`OperatorKind`]), so a single struct with
//! a [`FunctionSlot`] per variant models it; the *functions* inside the
//! slots stay an open set of trait objects.

use crate::error::{FunctionError, SdeError};
use crate::function::{
    AggregateFunction, FilterFunction, FlatMapFunction, JoinFunction, KeyByFunction, KeyStrategy,
    MapFunction, SinkFunction, SourceFunction, WindowFunction,
};
use crate::message::Message;
use crate::response::FunctionResponse;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, warn};

/// Graph-scoped operator identifier, assigned at registration.
pub type OperatorId = u64;

/// Default capacity of each join-side buffer.
pub const DEFAULT_JOIN_BUFFER: usize = 1024;

/// Closed set of operator variants.
///
/// `TopK` and `ITopK` are reserved tags: no function variant backs them
/// yet, so an operator carrying one of these kinds is unconfigured and
/// fails at its first `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Source,
    Map,
    Filter,
    Sink,
    FlatMap,
    KeyBy,
    Window,
    Aggregate,
    Join,
    TopK,
    ITopK,
}

impl std::fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            OperatorKind::Source => "source",
            OperatorKind::Map => "map",
            OperatorKind::Filter => "filter",
            OperatorKind::Sink => "sink",
            OperatorKind::FlatMap => "flat_map",
            OperatorKind::KeyBy => "key_by",
            OperatorKind::Window => "window",
            OperatorKind::Aggregate => "aggregate",
            OperatorKind::Join => "join",
            OperatorKind::TopK => "top_k",
            OperatorKind::ITopK => "itop_k",
        };
        f.write_str(label)
    }
}

/// The function owned by an operator, one variant per operator kind.
pub enum FunctionSlot {
    Source(Box<dyn SourceFunction>),
    Map(Box<dyn MapFunction>),
    Filter(Box<dyn FilterFunction>),
    FlatMap(Box<dyn FlatMapFunction>),
    KeyBy {
        function: Box<dyn KeyByFunction>,
        strategy: KeyStrategy,
    },
    Window(Box<dyn WindowFunction>),
    Aggregate(Box<dyn AggregateFunction>),
    Sink(Box<dyn SinkFunction>),
    Join {
        function: Box<dyn JoinFunction>,
        left: VecDeque<Message>,
        right: VecDeque<Message>,
        capacity: usize,
    },
}

impl FunctionSlot {
    /// Convenience constructor for a join slot with the default buffer
    /// capacity.
    pub fn join(function: Box<dyn JoinFunction>) -> Self {
        Self::join_with_capacity(function, DEFAULT_JOIN_BUFFER)
    }

    pub fn join_with_capacity(function: Box<dyn JoinFunction>, capacity: usize) -> Self {
        FunctionSlot::Join {
            function,
            left: VecDeque::new(),
            right: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// The operator kind this slot variant belongs to.
    pub fn kind(&self) -> OperatorKind {
        match self {
            FunctionSlot::Source(_) => OperatorKind::Source,
            FunctionSlot::Map(_) => OperatorKind::Map,
            FunctionSlot::Filter(_) => OperatorKind::Filter,
            FunctionSlot::FlatMap(_) => OperatorKind::FlatMap,
            FunctionSlot::KeyBy { .. } => OperatorKind::KeyBy,
            FunctionSlot::Window(_) => OperatorKind::Window,
            FunctionSlot::Aggregate(_) => OperatorKind::Aggregate,
            FunctionSlot::Sink(_) => OperatorKind::Sink,
            FunctionSlot::Join { .. } => OperatorKind::Join,
        }
    }

    pub fn function_name(&self) -> &str {
        match self {
            FunctionSlot::Source(f) => f.name(),
            FunctionSlot::Map(f) => f.name(),
            FunctionSlot::Filter(f) => f.name(),
            FunctionSlot::FlatMap(f) => f.name(),
            FunctionSlot::KeyBy { function, .. } => function.name(),
            FunctionSlot::Window(f) => f.name(),
            FunctionSlot::Aggregate(f) => f.name(),
            FunctionSlot::Sink(f) => f.name(),
            FunctionSlot::Join { function, .. } => function.name(),
        }
    }
}

impl std::fmt::Debug for FunctionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionSlot")
            .field("kind", &self.kind())
            .field("function", &self.function_name())
            .finish()
    }
}

/// Read-only snapshot of an operator's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorStats {
    pub processed: u64,
    pub emitted: u64,
    pub errors: u64,
}

/// A node in the execution graph.
///
/// Belongs to at most one graph; the graph assigns the id at registration
/// and owns the operator afterwards. External handles are ids, never
/// references.
#[derive(Debug)]
pub struct Operator {
    id: OperatorId,
    name: String,
    kind: OperatorKind,
    function: Option<FunctionSlot>,
    processed: AtomicU64,
    emitted: AtomicU64,
    errors: AtomicU64,
    opened: bool,
    closed: bool,
}

impl Operator {
    /// Build an operator around a function.
    ///
    /// A kind/function mismatch is a configuration error at registration
    /// time, surfaced as [`SdeError::NotConfigured`].
    pub fn new(
        name: impl Into<String>,
        kind: OperatorKind,
        function: FunctionSlot,
    ) -> Result<Self, SdeError> {
        let name = name.into();
        if function.kind() != kind {
            return Err(SdeError::NotConfigured(format!(
                "operator `{name}`: a {kind} operator cannot own a {} function",
                function.kind()
            )));
        }
        Ok(Self {
            id: 0,
            name,
            kind,
            function: Some(function),
            processed: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            opened: false,
            closed: false,
        })
    }

    /// Build an operator with an empty function slot. Its first `process`
    /// call records a configuration error and returns `false`.
    pub fn unconfigured(name: impl Into<String>, kind: OperatorKind) -> Self {
        Self {
            id: 0,
            name: name.into(),
            kind,
            function: None,
            processed: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            opened: false,
            closed: false,
        }
    }

    pub(crate) fn assign_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    pub fn id(&self) -> OperatorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> OperatorKind {
        self.kind
    }

    pub fn is_configured(&self) -> bool {
        self.function.is_some()
    }

    pub fn is_source(&self) -> bool {
        matches!(self.function, Some(FunctionSlot::Source(_)))
    }

    /// Whether the contained source function can still produce data.
    /// Always `false` for non-source operators.
    pub fn has_next(&self) -> bool {
        match &self.function {
            Some(FunctionSlot::Source(f)) => f.has_next(),
            _ => false,
        }
    }

    /// Open the operator, delegating to the function's `init` hook where
    /// one exists. Idempotent.
    pub fn open(&mut self) -> Result<(), SdeError> {
        if self.opened {
            return Ok(());
        }
        let result = match &mut self.function {
            Some(FunctionSlot::Source(f)) => f.init(),
            Some(FunctionSlot::Sink(f)) => f.init(),
            _ => Ok(()),
        };
        result.map_err(|e| SdeError::Resource {
            operator: self.name.clone(),
            source: anyhow::Error::new(e),
        })?;
        self.opened = true;
        self.closed = false;
        Ok(())
    }

    /// Close the operator, delegating to the function's `close` hook where
    /// one exists. Idempotent; a no-op if the operator was never opened.
    pub fn close(&mut self) -> Result<(), SdeError> {
        if !self.opened || self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = match &mut self.function {
            Some(FunctionSlot::Source(f)) => f.close(),
            Some(FunctionSlot::Sink(f)) => f.close(),
            _ => Ok(()),
        };
        result.map_err(|e| SdeError::Resource {
            operator: self.name.clone(),
            source: anyhow::Error::new(e),
        })
    }

    /// Run one invocation.
    ///
    /// Sources are driven with `input = None`; every other variant consumes
    /// exactly one message. `slot` names the input edge the record arrived
    /// on (only joins have more than one). Emitted messages are appended to
    /// `out` for the caller's scheduler to route.
    ///
    /// Never returns an error: function failures are trapped, counted,
    /// logged, and answered with `false`. Returns `true` iff at least one
    /// message was emitted.
    pub fn process(
        &mut self,
        input: Option<Message>,
        slot: usize,
        out: &mut FunctionResponse,
    ) -> bool {
        let name = self.name.as_str();
        let kind = self.kind;
        let Some(function) = self.function.as_mut() else {
            self.errors.fetch_add(1, Ordering::Relaxed);
            error!(operator = %name, kind = %kind, "process called on unconfigured operator");
            return false;
        };

        let emitted_before = out.len();
        let result: Result<(), FunctionError> = match function {
            FunctionSlot::Source(f) => {
                if !f.has_next() {
                    return false;
                }
                self.processed.fetch_add(1, Ordering::Relaxed);
                match f.execute(FunctionResponse::new()) {
                    Ok(produced) => {
                        for mut message in produced {
                            message.record_step(name);
                            out.add(message);
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            FunctionSlot::Map(f) => {
                Self::run_single(&self.processed, name, input, out, |resp| f.execute(resp))
            }
            FunctionSlot::FlatMap(f) => {
                Self::run_single(&self.processed, name, input, out, |resp| f.execute(resp))
            }
            FunctionSlot::Window(f) => {
                Self::run_single(&self.processed, name, input, out, |resp| f.execute(resp))
            }
            FunctionSlot::Aggregate(f) => {
                Self::run_single(&self.processed, name, input, out, |resp| f.execute(resp))
            }
            FunctionSlot::Filter(f) => {
                let result =
                    Self::run_single(&self.processed, name, input, out, |resp| f.execute(resp));
                // A filter retains at most the one record it was given.
                if out.len() > emitted_before + 1 {
                    warn!(operator = %name, "filter returned more than one message; extras dropped");
                    let mut kept: Vec<Message> = out.drain().collect();
                    kept.truncate(emitted_before + 1);
                    *out = FunctionResponse::from(kept);
                }
                result
            }
            FunctionSlot::KeyBy { function, strategy } => match input {
                Some(mut message) => {
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    match function.key(&message) {
                        Ok(key) => {
                            let (meta_key, meta_value) = strategy.apply(&key);
                            message.insert_metadata(meta_key, meta_value);
                            message.record_step(name);
                            out.add(message);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
                None => Err(FunctionError::new("missing input record")),
            },
            FunctionSlot::Sink(f) => match input {
                Some(message) => {
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    match f.execute(FunctionResponse::from(vec![message])) {
                        Ok(returned) => {
                            if !returned.is_empty() {
                                warn!(
                                    operator = %name,
                                    dropped = returned.len(),
                                    "sink returned a non-empty response; messages dropped"
                                );
                            }
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
                None => Err(FunctionError::new("missing input record")),
            },
            FunctionSlot::Join {
                function,
                left,
                right,
                capacity,
            } => match input {
                Some(message) => {
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    let buffer = match slot {
                        0 => &mut *left,
                        1 => &mut *right,
                        other => {
                            self.errors.fetch_add(1, Ordering::Relaxed);
                            error!(
                                operator = %name,
                                slot = other,
                                "join operator received a record on an unexpected input slot"
                            );
                            return false;
                        }
                    };
                    if buffer.len() >= *capacity {
                        warn!(operator = %name, slot, "join buffer full; dropping oldest record");
                        buffer.pop_front();
                    }
                    buffer.push_back(message);

                    let mut failure = None;
                    loop {
                        if left.is_empty() || right.is_empty() {
                            break;
                        }
                        let (Some(l), Some(r)) = (left.pop_front(), right.pop_front()) else {
                            break;
                        };
                        match function.execute_pair(
                            FunctionResponse::from(vec![l]),
                            FunctionResponse::from(vec![r]),
                        ) {
                            Ok(joined) => {
                                for mut message in joined {
                                    message.record_step(name);
                                    out.add(message);
                                }
                            }
                            Err(e) => {
                                failure = Some(e);
                                break;
                            }
                        }
                    }
                    match failure {
                        Some(e) => Err(e),
                        None => Ok(()),
                    }
                }
                None => Err(FunctionError::new("missing input record")),
            },
        };

        let emitted_now = out.len().saturating_sub(emitted_before) as u64;
        self.emitted.fetch_add(emitted_now, Ordering::Relaxed);

        if let Err(e) = result {
            self.errors.fetch_add(1, Ordering::Relaxed);
            error!(
                operator = %self.name,
                kind = %self.kind,
                error = %e,
                "function error; record discarded"
            );
            return false;
        }
        emitted_now > 0
    }

    /// Shared drive for the single-input variants: wrap the record, run the
    /// function, tag and emit every produced message.
    fn run_single(
        processed: &AtomicU64,
        name: &str,
        input: Option<Message>,
        out: &mut FunctionResponse,
        execute: impl FnOnce(FunctionResponse) -> Result<FunctionResponse, FunctionError>,
    ) -> Result<(), FunctionError> {
        let Some(message) = input else {
            return Err(FunctionError::new("missing input record"));
        };
        processed.fetch_add(1, Ordering::Relaxed);
        let produced = execute(FunctionResponse::from(vec![message]))?;
        for mut message in produced {
            message.record_step(name);
            out.add(message);
        }
        Ok(())
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn output_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> OperatorStats {
        OperatorStats {
            processed: self.processed_count(),
            emitted: self.output_count(),
            errors: self.error_count(),
        }
    }

    /// The only way counters shrink.
    pub fn reset_counters(&self) {
        self.processed.store(0, Ordering::Relaxed);
        self.emitted.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ContentKind;
    use crate::Payload;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingSource {
        remaining: usize,
        inits: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl SourceFunction for CountingSource {
        fn name(&self) -> &str {
            "counting-source"
        }

        fn init(&mut self) -> Result<(), FunctionError> {
            self.inits.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn execute(&mut self, _input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
            self.remaining -= 1;
            Ok(FunctionResponse::from(vec![Message::text("tick")]))
        }

        fn has_next(&self) -> bool {
            self.remaining > 0
        }

        fn close(&mut self) -> Result<(), FunctionError> {
            self.closes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct Upper;

    impl MapFunction for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
            let mut out = FunctionResponse::new();
            for mut m in input {
                let text = m.text_content().unwrap_or_default().to_uppercase();
                m.set_payload(ContentKind::Text, Payload::Text(text));
                out.add(m);
            }
            Ok(out)
        }
    }

    struct AlwaysFails;

    impl MapFunction for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }

        fn execute(&mut self, _input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
            Err(FunctionError::new("boom"))
        }
    }

    struct ConcatJoin;

    impl JoinFunction for ConcatJoin {
        fn name(&self) -> &str {
            "concat-join"
        }

        fn execute_pair(
            &mut self,
            left: FunctionResponse,
            right: FunctionResponse,
        ) -> Result<FunctionResponse, FunctionError> {
            let l = left.into_iter().next().ok_or_else(|| FunctionError::new("empty left"))?;
            let r = right
                .into_iter()
                .next()
                .ok_or_else(|| FunctionError::new("empty right"))?;
            let joined = format!(
                "{}|{}",
                l.text_content().unwrap_or_default(),
                r.text_content().unwrap_or_default()
            );
            Ok(FunctionResponse::from(vec![Message::text(joined)]))
        }
    }

    fn text_msg(id: u64, content: &str) -> Message {
        Message::with_id(id, ContentKind::Text, Payload::Text(content.into()))
    }

    #[test]
    fn kind_mismatch_is_rejected_at_construction() {
        let err = Operator::new(
            "bad",
            OperatorKind::Filter,
            FunctionSlot::Map(Box::new(Upper)),
        )
        .unwrap_err();
        assert!(matches!(err, SdeError::NotConfigured(_)));
    }

    #[test]
    fn unconfigured_operator_records_an_error() {
        let mut op = Operator::unconfigured("reserved", OperatorKind::TopK);
        let mut out = FunctionResponse::new();
        assert!(!op.process(Some(text_msg(1, "x")), 0, &mut out));
        assert_eq!(op.error_count(), 1);
        assert!(out.is_empty());
    }

    #[test]
    fn source_emits_until_exhausted() {
        let inits = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let mut op = Operator::new(
            "src",
            OperatorKind::Source,
            FunctionSlot::Source(Box::new(CountingSource {
                remaining: 2,
                inits: inits.clone(),
                closes: closes.clone(),
            })),
        )
        .unwrap();
        op.open().unwrap();
        op.open().unwrap();
        assert_eq!(inits.load(Ordering::Relaxed), 1);

        let mut out = FunctionResponse::new();
        assert!(op.process(None, 0, &mut out));
        assert!(op.process(None, 0, &mut out));
        assert!(!op.process(None, 0, &mut out));
        assert_eq!(out.len(), 2);
        assert_eq!(op.processed_count(), 2);
        assert_eq!(op.output_count(), 2);

        op.close().unwrap();
        op.close().unwrap();
        assert_eq!(closes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn map_transforms_and_tags_the_trace() {
        let mut op = Operator::new("upper", OperatorKind::Map, FunctionSlot::Map(Box::new(Upper)))
            .unwrap();
        let mut out = FunctionResponse::new();
        assert!(op.process(Some(text_msg(1, "abc")), 0, &mut out));
        let m = out.into_iter().next().unwrap();
        assert_eq!(m.text_content(), Some("ABC"));
        assert_eq!(m.trace(), ["upper"]);
    }

    #[test]
    fn function_error_is_trapped_and_counted() {
        let mut op = Operator::new(
            "failing",
            OperatorKind::Map,
            FunctionSlot::Map(Box::new(AlwaysFails)),
        )
        .unwrap();
        let mut out = FunctionResponse::new();
        assert!(!op.process(Some(text_msg(1, "x")), 0, &mut out));
        assert_eq!(op.error_count(), 1);
        assert_eq!(op.processed_count(), 1);
        assert_eq!(op.output_count(), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn join_pairs_records_in_fifo_order() {
        let mut op = Operator::new(
            "join",
            OperatorKind::Join,
            FunctionSlot::join(Box::new(ConcatJoin)),
        )
        .unwrap();
        let mut out = FunctionResponse::new();
        assert!(!op.process(Some(text_msg(1, "l1")), 0, &mut out));
        assert!(!op.process(Some(text_msg(2, "l2")), 0, &mut out));
        assert!(op.process(Some(text_msg(3, "r1")), 1, &mut out));
        assert!(op.process(Some(text_msg(4, "r2")), 1, &mut out));
        let texts: Vec<String> = out
            .into_iter()
            .map(|m| m.text_content().unwrap().to_string())
            .collect();
        assert_eq!(texts, vec!["l1|r1", "l2|r2"]);
    }

    #[test]
    fn join_buffer_overflow_drops_oldest() {
        let mut op = Operator::new(
            "join",
            OperatorKind::Join,
            FunctionSlot::join_with_capacity(Box::new(ConcatJoin), 2),
        )
        .unwrap();
        let mut out = FunctionResponse::new();
        for i in 1..=3 {
            op.process(Some(text_msg(i, &format!("l{i}"))), 0, &mut out);
        }
        assert!(op.process(Some(text_msg(9, "r")), 1, &mut out));
        let m = out.into_iter().next().unwrap();
        // l1 was evicted when l3 arrived.
        assert_eq!(m.text_content(), Some("l2|r"));
    }

    #[test]
    fn counters_reset_only_on_request() {
        let mut op = Operator::new("upper", OperatorKind::Map, FunctionSlot::Map(Box::new(Upper)))
            .unwrap();
        let mut out = FunctionResponse::new();
        op.process(Some(text_msg(1, "a")), 0, &mut out);
        assert_eq!(op.processed_count(), 1);
        op.reset_counters();
        assert_eq!(op.processed_count(), 0);
        assert_eq!(op.output_count(), 0);
        assert_eq!(op.error_count(), 0);
    }
}
