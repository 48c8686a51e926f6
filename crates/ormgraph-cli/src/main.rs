//! ormgraph command-line tool.
//!
//! Opens a store directory, runs the demo object graphs through the
//! persistence engine and inspects what ended up in the tables.

mod demo;
mod formatter;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use formatter::OutputFormat;
use ormgraph_core::EngineConfig;
use ormgraph_proto::Predicate;
use ormgraph_store::{StorageConfig, StorageEngine};
use thiserror::Error;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// ormgraph command-line tool
#[derive(Parser, Debug)]
#[command(name = "ormgraph")]
#[command(version, about = "Object-graph persistence demo and store inspector")]
pub struct Args {
    /// Store directory
    #[arg(short = 'd', long, default_value = "./ormgraph_data")]
    pub data: PathBuf,

    /// Engine configuration file (JSON)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Skip foreign key checks in the store
    #[arg(long)]
    pub no_foreign_keys: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the demo schema and run the cascade walkthrough
    Demo,
    /// Print the DDL of the demo schema
    Schema,
    /// Print the prepared selects loading a demo mapping
    Plan { mapping: String },
    /// List tables with their row counts
    Tables,
    /// Print the rows of a table
    Dump { table: String },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] ormgraph_core::Error),

    #[error(transparent)]
    Store(#[from] ormgraph_store::Error),

    #[error(transparent)]
    Statement(#[from] ormgraph_proto::Error),

    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("demo failed: {0}")]
    Demo(String),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    let ctx = demo::context(config)?;

    match &args.command {
        Command::Schema => {
            for def in ctx.table_defs()? {
                println!("{};", def.to_ddl());
            }
            return Ok(());
        }
        Command::Plan { mapping } => {
            for plan in ctx.join_plans(mapping)? {
                println!("-- {}", plan.mappings().collect::<Vec<_>>().join(" -> "));
                println!("{}", plan.select());
                println!("-- {} joins, {} deferred relations\n", plan.join_count(), plan.deferred_count());
            }
            return Ok(());
        }
        _ => {}
    }

    let engine = StorageEngine::open(StorageConfig::new(&args.data).with_foreign_keys(!args.no_foreign_keys))?;
    tracing::info!(path = %args.data.display(), "store opened");

    match &args.command {
        Command::Demo => demo::run(&ctx, &engine, args.format)?,
        Command::Tables => {
            let mut tables = Vec::new();
            for name in engine.table_names() {
                let count = engine.count(&name)?;
                tables.push((name, count));
            }
            println!("{}", formatter::format_tables(&tables, args.format));
        }
        Command::Dump { table } => {
            let def = engine
                .table_def(table)
                .ok_or_else(|| CliError::UnknownTable(table.clone()))?;
            let rows = engine.scan(table, &Predicate::all())?;
            println!("{}", formatter::format_rows(&def, &rows, args.format));
        }
        Command::Schema | Command::Plan { .. } => {}
    }
    Ok(())
}
