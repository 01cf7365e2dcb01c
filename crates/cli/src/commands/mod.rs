// CLI commands

pub mod connect;
pub mod expand;
pub mod run;
pub mod validate;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use schemaflow_core::{parse_workflow, WorkflowDefinition};

/// Read and parse a workflow document; `-` reads stdin
pub fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let bytes = if path == Path::new("-") {
        let mut buffer = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buffer)
            .context("failed to read workflow from stdin")?;
        buffer
    } else {
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?
    };

    parse_workflow(&bytes).with_context(|| format!("invalid workflow document {}", path.display()))
}
