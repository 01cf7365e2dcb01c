// Run command

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use schemaflow_coordinator::{Phase, PhaseManager};
use schemaflow_core::workflow::original_id;
use schemaflow_core::WorkflowExpander;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::load_definition;
use crate::hub::{init_logging, HubSession};
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};
use crate::runner::{default_registry, RunReport, WorkflowRunner};

pub async fn run(file: &Path, hub: Option<String>, output: OutputFormat, quiet: bool) -> Result<()> {
    let registry = default_registry()?;
    let capabilities: Vec<String> = registry.names().into_iter().map(str::to_string).collect();
    let phases = Arc::new(PhaseManager::new());

    let mut session = match hub {
        Some(addr) => Some(HubSession::start(
            Some(addr),
            capabilities,
            phases.clone(),
            quiet,
        )?),
        None => {
            init_logging(quiet, None)?;
            None
        }
    };

    let definition = load_definition(file)?;
    let mut run = WorkflowExpander::default()
        .expand(&definition)
        .with_context(|| format!("failed to expand workflow {}", definition.identifier))?;

    let mut runner = WorkflowRunner::new(registry, phases);
    if let Some(session) = session.as_mut() {
        let timeout = session.connect_timeout();
        if !session.wait_registered(timeout).await {
            warn!("hub did not acknowledge registration, running without it");
        }
        runner = runner.with_hub(session.handle());
    }

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling run");
                cancel.cancel();
            }
        }
    });

    info!(run_id = %run.run_id, instances = run.actions.len(), "starting run");
    let report = runner.execute(&mut run, &cancel).await;
    interrupt.abort();

    if let Some(session) = session {
        match session.shutdown().await {
            Ok(stats) => info!(
                sent = stats.messages_sent,
                dropped = stats.dropped(),
                "hub session closed"
            ),
            Err(e) => warn!(error = %e, "hub session ended with an error"),
        }
    }

    print_report(&report, output, quiet)?;

    if report.phase != Phase::Completed {
        bail!(
            "run {} finished {} ({} of {} actions failed)",
            report.run_id,
            report.phase,
            report.failed(),
            report.total
        );
    }
    Ok(())
}

fn print_report(report: &RunReport, output: OutputFormat, quiet: bool) -> Result<()> {
    if !output.is_text() {
        return output.print_value(report);
    }
    if quiet {
        return Ok(());
    }

    print_field("Run", &report.run_id.to_string());
    print_field("Workflow", &report.workflow_id);
    print_field("Phase", report.phase.as_str());
    print_field(
        "Executed",
        &format!("{} of {}", report.actions.len(), report.total),
    );
    println!();

    print_table_header(&[("ACTION", 36), ("STATUS", 10), ("EXECUTOR", 9), ("MS", 7), ("ERROR", 40)]);
    for action in &report.actions {
        let executor = action.executor.as_deref().unwrap_or("-");
        let duration = action
            .duration_ms
            .map_or_else(|| "-".to_string(), |ms| ms.to_string());
        let error = match (&action.error_code, &action.error) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            _ => "-".to_string(),
        };
        print_table_row(&[
            (original_id(&action.identifier), 36),
            (&action.status, 10),
            (executor, 9),
            (&duration, 7),
            (&error, 40),
        ]);
    }
    Ok(())
}
