//! # SDE CLI - Streaming Dataflow Pipeline Runner
//!
//! Loads a YAML pipeline specification, builds the execution graph, and
//! drives it under the configured scheduling mode with graceful Ctrl-C
//! shutdown.
//!
//! ## Usage
//!
//! ```bash
//! # Run a pipeline from a YAML configuration file
//! sde-cli --pipeline demos/uppercase.yml
//!
//! # Enable debug logging
//! RUST_LOG=debug sde-cli --pipeline demos/uppercase.yml
//! ```
//!
//! The YAML file declares sources, transforms, sinks, and the edges wiring
//! them together; see the `demos/` directory for samples.

use anyhow::{bail, Context, Result};
use clap::Parser;
use sde_core::{ExecutionGraph, Operator, OperatorId, OperatorKind, PipelineSpec};
use sde_engine::{EngineConfig, StreamEngine};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for the SDE pipeline runner
#[derive(Parser, Debug)]
#[command(name = "sde-cli")]
#[command(about = "Streaming Dataflow Pipeline Runner")]
struct Args {
    /// Pipeline YAML configuration file
    #[arg(short, long)]
    pipeline: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let spec: PipelineSpec = {
        let yaml = std::fs::read_to_string(&args.pipeline)
            .with_context(|| format!("read {}", args.pipeline.display()))?;
        serde_yaml::from_str(&yaml).context("parse pipeline spec")?
    };
    info!(pipeline = %spec.name, mode = ?spec.engine.mode, "pipeline loaded");

    let engine = StreamEngine::with_config(EngineConfig {
        mode: spec.engine.mode,
        workers: spec.engine.workers.max(1),
        channel_capacity: spec.engine.channel_capacity.max(1),
        ..EngineConfig::default()
    });

    let graph = build_graph(&spec)?;
    let graph_id = engine.submit(graph)?;

    let exec_engine = engine.clone();
    let mut execution =
        tokio::task::spawn_blocking(move || exec_engine.execute(graph_id));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nreceived ctrl-c, stopping pipeline...");
            engine.stop(graph_id);
            let _ = (&mut execution).await;
        }
        finished = &mut execution => {
            finished.context("execution thread panicked")??;
        }
    }

    info!(
        state = ?engine.state(graph_id),
        processed = engine.processed_messages(),
        throughput = engine.throughput(),
        "pipeline finished"
    );
    Ok(())
}

/// Materialise the declarative spec into an execution graph: build every
/// function through the io/tx factories, register the operators, then wire
/// the edges by spec id.
fn build_graph(spec: &PipelineSpec) -> Result<ExecutionGraph> {
    let mut graph = ExecutionGraph::new();
    let mut ids: HashMap<String, OperatorId> = HashMap::new();

    let register = |graph: &mut ExecutionGraph,
                        ids: &mut HashMap<String, OperatorId>,
                        spec_id: &str,
                        operator: Operator|
     -> Result<()> {
        if ids.contains_key(spec_id) {
            bail!("duplicate operator id `{spec_id}` in pipeline spec");
        }
        let id = graph.add_operator(operator)?;
        ids.insert(spec_id.to_string(), id);
        Ok(())
    };

    for source in &spec.sources {
        let function = sde_io::create_source(source);
        let operator = Operator::new(
            source.id(),
            OperatorKind::Source,
            sde_core::FunctionSlot::Source(function),
        )?;
        register(&mut graph, &mut ids, source.id(), operator)?;
    }
    for transform in &spec.transforms {
        let (kind, slot) = sde_tx::create_transform(transform)?;
        let operator = Operator::new(transform.id(), kind, slot)?;
        register(&mut graph, &mut ids, transform.id(), operator)?;
    }
    for sink in &spec.sinks {
        let function = sde_io::create_sink(sink);
        let operator = Operator::new(
            sink.id(),
            OperatorKind::Sink,
            sde_core::FunctionSlot::Sink(function),
        )?;
        register(&mut graph, &mut ids, sink.id(), operator)?;
    }

    for (from, to) in &spec.edges {
        let Some(&from_id) = ids.get(from) else {
            bail!("edge references unknown operator `{from}`");
        };
        let Some(&to_id) = ids.get(to) else {
            bail!("edge references unknown operator `{to}`");
        };
        graph.connect(from_id, to_id)?;
    }

    Ok(graph)
}
