/// Flowtest engine
///
/// Main entry point. Two commands:
/// - `serve` (default): start the HTTP API on the configured address
/// - `run <file.flow> [environment]`: run one flow file, printing NDJSON log lines
///   and the final result to stdout

use anyhow::{anyhow, Context, Result};
use flowtest_engine::{
    api::runs::RunEvent,
    config::Config,
    flow::environment::load_environment,
    nodes::NodeRegistry,
    runtime::{runs::RunOptions, FlowRunner, RunOutcome},
    server::{init_tracing, start_server},
};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (defaults to 127.0.0.1:3005 and ./flows)
    let config = Config::default();
    init_tracing(&config.logging);

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None | Some("serve") => start_server(config).await,
        Some("run") => {
            let file = args
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("usage: flowtest-engine run <file.flow> [environment]"))?;
            let outcome = run_file(&config, &file, args.next().as_deref()).await?;
            if outcome != RunOutcome::Completed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(other) => Err(anyhow!("unknown command '{}', expected 'serve' or 'run'", other)),
    }
}

/// Run a single flow file and print its event stream
async fn run_file(config: &Config, file: &Path, environment: Option<&str>) -> Result<RunOutcome> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let variables = match environment {
        Some(name) => {
            // Environments live next to the flow file
            let collection = file.parent().unwrap_or_else(|| Path::new("."));
            load_environment(collection, name)
                .await
                .with_context(|| format!("Failed to load environment '{}'", name))?
        }
        None => Default::default(),
    };

    let runner = FlowRunner::new(Arc::new(NodeRegistry::standard()), config.run.executor_config());
    let options = RunOptions::default()
        .with_timeout(config.run.timeout())
        .with_variables(variables);

    let (mut logs, completion) = runner.run_text(&text, options).into_parts();
    while let Some(entry) = logs.next().await {
        println!("{}", serde_json::to_string(&RunEvent::Log(entry))?);
    }
    let result = completion.wait().await;
    let outcome = result.outcome;
    println!("{}", serde_json::to_string(&RunEvent::Result(result))?);

    Ok(outcome)
}
