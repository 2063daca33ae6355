//! # bridge-node
//!
//! ```text
//! bridge-node serve                            # L4 endpoint until Ctrl+C
//! bridge-node stdio                            # one L2 call: stdin → stdout
//! bridge-node exec <module> <command> [ARGS]   # ARGS is a JSON array
//! ```
//!
//! Configuration comes from `BRIDGE_CONFIG` plus `BRIDGE_*` overrides. Logs
//! always go to stderr.

use anyhow::{bail, Context, Result};
use bridge_node::{Node, NodeConfig};
use bridge_registry::ExecutionMode;
use bridge_telemetry::{init_tracing, TelemetryConfig};
use bridge_transport::SOURCE_DIST_ENV;
use bridge_types::{validate_args, Envelope};
use serde_json::Value;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "serve".to_string());
    let telemetry = TelemetryConfig::for_service("bridge-node");

    match mode.as_str() {
        "serve" => {
            init_tracing(&telemetry)?;
            let node = Node::new(NodeConfig::load().context("loading configuration")?)?;
            info!("Node is running. Press Ctrl+C to stop.");
            node.serve(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            })
            .await?;
        }
        "stdio" => {
            init_tracing(&telemetry.without_ansi())?;
            let node = Node::new(NodeConfig::load().context("loading configuration")?)?;
            let source_dist = std::env::var(SOURCE_DIST_ENV).ok();
            node.serve_stdio(
                source_dist.as_deref(),
                tokio::io::stdin(),
                tokio::io::stdout(),
            )
            .await?;
        }
        "exec" => {
            init_tracing(&telemetry)?;
            let module = args.next().context("exec needs <module> <command>")?;
            let command = args.next().context("exec needs <module> <command>")?;
            let call_args = match args.next() {
                Some(raw) => parse_args(&raw)?,
                None => Vec::new(),
            };

            let mut config = NodeConfig::load().context("loading configuration")?;
            config.node.mode = ExecutionMode::Cli;
            let node = Node::new(config)?;

            let envelope = Envelope::from_result(node.exec(&module, &command, &call_args)?);
            println!("{}", envelope.to_json_string());
            if !envelope.is_ok() {
                std::process::exit(1);
            }
        }
        other => bail!("unknown mode '{other}' (expected serve, stdio or exec)"),
    }
    Ok(())
}

fn parse_args(raw: &str) -> Result<Vec<Value>> {
    let args: Vec<Value> =
        serde_json::from_str(raw).context("ARGS must be a JSON array")?;
    validate_args(&args)?;
    Ok(args)
}
