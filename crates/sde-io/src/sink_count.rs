//! Counting sink: tracks receipts behind a shared atomic.

use sde_core::{FunctionError, FunctionResponse, SinkFunction};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

/// Counts received messages; the total is logged at close and observable
/// at any time through the shared handle.
pub struct CountSink {
    id: String,
    count: Arc<AtomicUsize>,
}

impl CountSink {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn handle(&self) -> Arc<AtomicUsize> {
        self.count.clone()
    }
}

impl SinkFunction for CountSink {
    fn name(&self) -> &str {
        &self.id
    }

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        self.count.fetch_add(input.len(), Ordering::Relaxed);
        Ok(FunctionResponse::new())
    }

    fn close(&mut self) -> Result<(), FunctionError> {
        info!(sink = %self.id, received = self.count.load(Ordering::Relaxed), "count sink closed");
        Ok(())
    }
}
