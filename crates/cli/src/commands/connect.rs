// Connect command
//
// Keeps a coordinator connected without running anything, so the hub can
// see the service and query it.

use std::sync::Arc;

use anyhow::Result;
use schemaflow_coordinator::{CoordinatorStats, PhaseManager};
use tracing::info;

use crate::hub::HubSession;
use crate::output::{print_field, OutputFormat};
use crate::runner::default_registry;

pub async fn run(hub: Option<String>, output: OutputFormat, quiet: bool) -> Result<()> {
    let capabilities: Vec<String> = default_registry()?
        .names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut session = HubSession::start(hub, capabilities, Arc::new(PhaseManager::new()), quiet)?;

    let stopped = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, disconnecting");
            None
        }
        result = session.closed() => Some(result),
    };

    let stats = session.shutdown().await;
    if let Some(result) = stopped {
        result?;
    }
    print_stats(&stats?, output, quiet)
}

fn print_stats(stats: &CoordinatorStats, output: OutputFormat, quiet: bool) -> Result<()> {
    if !output.is_text() {
        return output.print_value(stats);
    }
    if quiet {
        return Ok(());
    }

    print_field("Connections", &stats.connections.to_string());
    print_field("Sent", &stats.messages_sent.to_string());
    print_field("Received", &stats.messages_received.to_string());
    print_field("Dropped", &stats.dropped().to_string());
    print_field("Errors", &stats.handler_errors.to_string());
    Ok(())
}
