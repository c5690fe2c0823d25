//! Discarding sink.

use sde_core::{FunctionError, FunctionResponse, SinkFunction};

/// Consumes and drops everything. Handy for benchmarking upstream stages.
pub struct NullSink {
    id: String,
}

impl NullSink {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl SinkFunction for NullSink {
    fn name(&self) -> &str {
        &self.id
    }

    fn execute(&mut self, _input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        Ok(FunctionResponse::new())
    }
}
