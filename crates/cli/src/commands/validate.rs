// Validate command

use std::path::Path;

use anyhow::{Context, Result};
use schemaflow_core::{WorkflowAction, WorkflowDefinition, WorkflowExpander};
use serde::Serialize;

use super::load_definition;
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};

/// Summary of a valid workflow document
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: String,
    /// Action instances produced by expansion
    pub instances: usize,
    pub actions: Vec<EntrySummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub identifier: String,
    /// `single` or `loop`
    pub entry: &'static str,
    pub instances: usize,
    pub dependencies: Vec<String>,
}

impl WorkflowSummary {
    pub fn new(definition: &WorkflowDefinition) -> Self {
        let actions = definition
            .actions
            .iter()
            .map(|action| {
                let (entry, instances) = match action {
                    WorkflowAction::Single { .. } => ("single", 1),
                    WorkflowAction::Loop { definition, .. } => ("loop", definition.items.len()),
                };
                EntrySummary {
                    identifier: action.identifier().to_string(),
                    entry,
                    instances,
                    dependencies: action.dependencies().to_vec(),
                }
            })
            .collect();

        Self {
            identifier: definition.identifier.clone(),
            name: definition.name.clone(),
            kind: definition.kind.to_string(),
            instances: definition.instance_count(),
            actions,
        }
    }
}

pub fn run(file: &Path, output: OutputFormat, quiet: bool) -> Result<()> {
    let definition = load_definition(file)?;
    // A document is only valid if it also expands
    WorkflowExpander::default()
        .expand(&definition)
        .with_context(|| format!("workflow {} does not expand", definition.identifier))?;

    let summary = WorkflowSummary::new(&definition);
    if !output.is_text() {
        return output.print_value(&summary);
    }

    if quiet {
        println!("{}", summary.identifier);
        return Ok(());
    }

    print_field("Workflow", &summary.identifier);
    if let Some(name) = &summary.name {
        print_field("Name", name);
    }
    print_field("Kind", &summary.kind);
    print_field("Instances", &summary.instances.to_string());
    println!();

    print_table_header(&[("IDENTIFIER", 28), ("ENTRY", 8), ("INSTANCES", 10), ("REQUIRES", 30)]);
    for entry in &summary.actions {
        let requires = if entry.dependencies.is_empty() {
            "-".to_string()
        } else {
            entry.dependencies.join(",")
        };
        print_table_row(&[
            (&entry.identifier, 28),
            (entry.entry, 8),
            (&entry.instances.to_string(), 10),
            (&requires, 30),
        ]);
    }
    Ok(())
}
