// Expand command

use std::path::Path;

use anyhow::{Context, Result};
use schemaflow_core::WorkflowExpander;

use super::load_definition;
use crate::output::OutputFormat;

/// Print the expanded action instances. Text output is JSON, compact unless
/// `pretty` is set.
pub fn run(file: &Path, output: OutputFormat, pretty: bool) -> Result<()> {
    let definition = load_definition(file)?;
    let run = WorkflowExpander::default()
        .expand(&definition)
        .with_context(|| format!("failed to expand workflow {}", definition.identifier))?;

    tracing::debug!(
        run_id = %run.run_id,
        workflow_id = %run.workflow_id,
        instances = run.actions.len(),
        "workflow expanded"
    );

    if !output.is_text() {
        return output.print_value(&run.actions);
    }

    let json = if pretty {
        serde_json::to_string_pretty(&run.actions)?
    } else {
        serde_json::to_string(&run.actions)?
    };
    println!("{json}");
    Ok(())
}
