// SchemaFlow CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Logs go to stderr so command output can be piped.

mod commands;
mod hub;
mod output;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "schemaflow")]
#[command(about = "SchemaFlow CLI - Validate, expand and run JSON-LD workflows")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse a workflow document and print a summary
    Validate {
        /// Workflow document (`-` reads stdin)
        file: PathBuf,
    },

    /// Expand a workflow into its action instances
    Expand {
        /// Workflow document (`-` reads stdin)
        file: PathBuf,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Expand a workflow and execute its action instances in order
    Run {
        /// Workflow document (`-` reads stdin)
        file: PathBuf,

        /// Report phases to the coordination hub at this address
        #[arg(long)]
        hub: Option<String>,
    },

    /// Stay connected to the coordination hub until interrupted
    Connect {
        /// Hub address (defaults to SCHEMAFLOW_HUB_ADDR)
        #[arg(long)]
        hub: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Validate { file } => {
            hub::init_logging(cli.quiet, None)?;
            commands::validate::run(&file, output_format, cli.quiet)
        }
        Commands::Expand { file, pretty } => {
            hub::init_logging(cli.quiet, None)?;
            commands::expand::run(&file, output_format, pretty)
        }
        Commands::Run { file, hub } => {
            commands::run::run(&file, hub, output_format, cli.quiet).await
        }
        Commands::Connect { hub } => commands::connect::run(hub, output_format, cli.quiet).await,
    }
}
