//! Collecting sink: stores every received message behind a shared handle.

use sde_core::{FunctionError, FunctionResponse, Message, SinkFunction};
use std::sync::{Arc, Mutex};

/// Shared view over the messages a [`CollectSink`] has received.
pub type Collected = Arc<Mutex<Vec<Message>>>;

/// Appends every received message to a shared vector. The handle stays
/// valid after the pipeline finishes, which makes this the workhorse sink
/// for integration tests.
pub struct CollectSink {
    id: String,
    store: Collected,
}

impl CollectSink {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            store: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn handle(&self) -> Collected {
        self.store.clone()
    }
}

impl SinkFunction for CollectSink {
    fn name(&self) -> &str {
        &self.id
    }

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        let mut store = self
            .store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for message in input {
            store.push(message);
        }
        Ok(FunctionResponse::new())
    }
}
