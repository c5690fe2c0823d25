//! Standard output sink for development and debugging.

use sde_core::{FunctionError, FunctionResponse, Payload, SinkFunction};

pub struct StdoutSink {
    id: String,
}

impl StdoutSink {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl SinkFunction for StdoutSink {
    fn name(&self) -> &str {
        &self.id
    }

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        for message in input {
            match message.payload() {
                Payload::Text(text) => println!("{text}"),
                Payload::Bytes(bytes) => {
                    println!("[{} {} bytes]", message.kind(), bytes.len())
                }
                Payload::Vector(vector) => {
                    println!("[{} dim={}]", message.kind(), vector.len())
                }
            }
        }
        Ok(FunctionResponse::new())
    }
}
