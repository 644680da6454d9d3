use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use protoschema::model::CompileOptions;
use tracing_subscriber::EnvFilter;

mod cmd_check;
mod cmd_list;
mod cmd_show;
mod common;

use common::RunOptions;

#[derive(Parser, Debug)]
#[command(name = "schemactl", version, about = "Protocol schema checker")]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Output JSON where applicable
    #[arg(long)]
    json: bool,
    /// Treat warnings as errors
    #[arg(long)]
    warn_as_err: bool,
    /// Explicit schema processing order (comma separated names)
    #[arg(long, value_delimiter = ',')]
    schema_order: Vec<String>,
    /// Keep unknown attributes instead of rejecting them
    #[arg(long)]
    allow_unknown_attributes: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Validate schema files and print diagnostics
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List fields, messages, interfaces and frames
    List {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show one entity by qualified name (`ns.Name` or `@schema.ns.Name`)
    Show {
        #[arg(long)]
        name: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            json: self.json,
            compile: CompileOptions {
                schema_order: self.schema_order.clone(),
                warnings_as_errors: self.warn_as_err,
                allow_unknown_attributes: self.allow_unknown_attributes,
            },
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let options = cli.run_options();
    match &cli.cmd {
        Cmd::Check { files } => cmd_check::run(files, &options)?,
        Cmd::List { files } => cmd_list::run(files, &options)?,
        Cmd::Show { name, files } => cmd_show::run(files, name, &options)?,
    };

    Ok(())
}
